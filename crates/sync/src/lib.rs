//! Gossip-driven block synchronization: an active pull-sync state machine
//! and the passive server that answers peers from the local block store.

mod config;
mod gossip;
mod messages;
mod metrics;
mod server;
mod state_machine;
mod storage;

#[cfg(test)]
mod mocks;

pub use config::SyncConfig;
pub use gossip::BlockSyncTransport;
pub use messages::{
    BlockAvailabilityRequest, BlockAvailabilityResponse, BlockSyncRange, BlockSyncRequest,
    BlockSyncResponse, BlockType, SenderSignature,
};
pub use server::BlockSyncServer;
pub use state_machine::{BlockSync, BlockSyncHandle, SyncEvent, SyncState};
pub use storage::BlockSyncStorage;
