use crate::messages::{
    BlockAvailabilityRequest, BlockAvailabilityResponse, BlockSyncRequest, BlockSyncResponse,
};
use async_trait::async_trait;
use lattice_common::error::SyncError;
use lattice_common::types::NodeAddress;

/// Gossip transport for block sync messages. Send failures are surfaced to
/// the caller and never retried at this layer; retry is driven by the sync
/// state machine's timers.
#[async_trait]
pub trait BlockSyncTransport: Send + Sync {
    async fn broadcast_block_availability_request(
        &self,
        request: BlockAvailabilityRequest,
    ) -> Result<(), SyncError>;

    async fn send_block_availability_response(
        &self,
        recipient: NodeAddress,
        response: BlockAvailabilityResponse,
    ) -> Result<(), SyncError>;

    async fn send_block_sync_request(
        &self,
        recipient: NodeAddress,
        request: BlockSyncRequest,
    ) -> Result<(), SyncError>;

    async fn send_block_sync_response(
        &self,
        recipient: NodeAddress,
        response: BlockSyncResponse,
    ) -> Result<(), SyncError>;
}
