use async_trait::async_trait;
use lattice_common::error::Result;
use lattice_common::types::{BlockHeight, BlockPair};

/// Commit gate the sync state machine drives blocks through. Validation and
/// commit are separate calls so the surrounding service can reject a block
/// (fork signal, bad proof) without touching the store.
#[async_trait]
pub trait BlockSyncStorage: Send + Sync {
    async fn last_committed_block_height(&self) -> BlockHeight;

    async fn validate_block_for_commit(&self, block: &BlockPair) -> Result<()>;

    async fn commit_block(&self, block: &BlockPair) -> Result<()>;

    /// Lets consensus re-anchor to the true persisted tip. Called once
    /// before each availability broadcast and once after each processed
    /// chunk.
    async fn update_consensus_algos_about_latest_committed_block(&self);
}
