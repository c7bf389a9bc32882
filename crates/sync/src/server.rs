//! Passive side of block sync: answers peers' availability and chunk
//! requests from the local block store. Stateless beyond the store's read
//! path; malformed messages are rejected, never panicked on.

use crate::gossip::BlockSyncTransport;
use crate::messages::{
    BlockAvailabilityRequest, BlockAvailabilityResponse, BlockSyncRange, BlockSyncRequest,
    BlockSyncResponse, SenderSignature,
};
use lattice_common::error::{Result, SyncError};
use lattice_common::types::NodeAddress;
use lattice_storage::BlockStore;
use std::sync::Arc;
use tracing::{debug, info};

pub struct BlockSyncServer<T> {
    node_address: NodeAddress,
    batch_size: u32,
    store: Arc<BlockStore>,
    transport: Arc<T>,
}

impl<T: BlockSyncTransport> BlockSyncServer<T> {
    pub fn new(
        node_address: NodeAddress,
        batch_size: u32,
        store: Arc<BlockStore>,
        transport: Arc<T>,
    ) -> Self {
        BlockSyncServer {
            node_address,
            batch_size,
            store,
            transport,
        }
    }

    /// Advertises this node's full available range, but only to requesters
    /// that are actually behind us; a requester at or above our height gets
    /// no reply.
    pub async fn handle_block_availability_request(
        &self,
        request: BlockAvailabilityRequest,
    ) -> Result<()> {
        let sender = request
            .sender
            .as_ref()
            .ok_or(SyncError::MalformedMessage("availability request without sender"))?;
        let range = request
            .signed_batch_range
            .as_ref()
            .ok_or(SyncError::MalformedMessage("availability request without range"))?;

        let last_committed = self.store.get_last_block_height();
        if range.last_committed_block_height >= last_committed {
            debug!(
                requester = %sender.sender_node_address,
                theirs = range.last_committed_block_height,
                ours = last_committed,
                "requester is not behind us, ignoring availability request"
            );
            return Ok(());
        }

        let response = BlockAvailabilityResponse {
            sender: Some(SenderSignature::unsigned(self.node_address)),
            signed_batch_range: Some(BlockSyncRange {
                block_type: range.block_type,
                first_block_height: 1,
                last_block_height: last_committed,
                last_committed_block_height: last_committed,
            }),
        };
        self.transport
            .send_block_availability_response(sender.sender_node_address, response)
            .await?;
        debug!(
            recipient = %sender.sender_node_address,
            last_committed,
            "advertised block availability"
        );
        Ok(())
    }

    /// Serves a chunk of blocks, clamping the requested range to the batch
    /// size and to what the store actually holds. Rejects requesters that
    /// ask for a range starting at or above our committed tip.
    pub async fn handle_block_sync_request(&self, request: BlockSyncRequest) -> Result<()> {
        let sender = request
            .sender
            .as_ref()
            .ok_or(SyncError::MalformedMessage("block sync request without sender"))?;
        let range = request
            .signed_chunk_range
            .as_ref()
            .ok_or(SyncError::MalformedMessage("block sync request without range"))?;

        let last_committed = self.store.get_last_block_height();
        if range.first_block_height >= last_committed {
            return Err(SyncError::InvalidRange(format!(
                "first requested height {} is not behind last committed height {}",
                range.first_block_height, last_committed
            ))
            .into());
        }

        let first = range.first_block_height.max(1);
        let batch = u64::from(self.batch_size.max(1));
        let last = range
            .last_block_height
            .min(first + batch - 1)
            .min(last_committed);

        let mut blocks = Vec::new();
        let page = batch.min(u64::from(u8::MAX)) as u8;
        self.store.scan_blocks(first, page, |_, chunk| {
            for block in chunk {
                if block.height() > last {
                    return false;
                }
                blocks.push(block.clone());
            }
            blocks.last().map_or(true, |b| b.height() < last)
        })?;

        let actual_last = blocks.last().map(|b| b.height()).unwrap_or(first);
        let count = blocks.len();
        let response = BlockSyncResponse {
            sender: Some(SenderSignature::unsigned(self.node_address)),
            signed_chunk_range: Some(BlockSyncRange {
                block_type: range.block_type,
                first_block_height: first,
                last_block_height: actual_last,
                last_committed_block_height: last_committed,
            }),
            block_pairs: blocks,
        };
        self.transport
            .send_block_sync_response(sender.sender_node_address, response)
            .await?;
        info!(
            recipient = %sender.sender_node_address,
            first,
            last = actual_last,
            count,
            "served block sync chunk"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::BlockType;
    use crate::mocks::RecordingTransport;
    use lattice_common::error::LatticeError;
    use lattice_common::test_kit;
    use lattice_storage::BlockStorageConfig;
    use prometheus::Registry;
    use tempfile::TempDir;

    fn server_with_blocks(
        dir: &TempDir,
        count: u64,
        batch_size: u32,
    ) -> (BlockSyncServer<RecordingTransport>, Arc<RecordingTransport>) {
        let config = BlockStorageConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let store = Arc::new(BlockStore::open(config, &Registry::new()).unwrap());
        for block in test_kit::chain(count) {
            store.write_next_block(&block).unwrap();
        }
        let transport = Arc::new(RecordingTransport::new());
        let server = BlockSyncServer::new(
            test_kit::node_address(1),
            batch_size,
            store,
            transport.clone(),
        );
        (server, transport)
    }

    fn availability_request(seed: u8, last_committed: u64) -> BlockAvailabilityRequest {
        BlockAvailabilityRequest {
            sender: Some(SenderSignature::unsigned(test_kit::node_address(seed))),
            signed_batch_range: Some(BlockSyncRange {
                block_type: BlockType::BlockPair,
                first_block_height: last_committed + 1,
                last_block_height: last_committed + 10,
                last_committed_block_height: last_committed,
            }),
        }
    }

    fn sync_request(seed: u8, first: u64, last: u64) -> BlockSyncRequest {
        BlockSyncRequest {
            sender: Some(SenderSignature::unsigned(test_kit::node_address(seed))),
            signed_chunk_range: Some(BlockSyncRange {
                block_type: BlockType::BlockPair,
                first_block_height: first,
                last_block_height: last,
                last_committed_block_height: first.saturating_sub(1),
            }),
        }
    }

    #[tokio::test]
    async fn advertises_full_range_to_a_lagging_requester() {
        let dir = TempDir::new().unwrap();
        let (server, transport) = server_with_blocks(&dir, 5, 10);

        server
            .handle_block_availability_request(availability_request(2, 2))
            .await
            .unwrap();

        let responses = transport.availability_responses.lock().unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].0, test_kit::node_address(2));
        let range = responses[0].1.signed_batch_range.unwrap();
        assert_eq!(range.first_block_height, 1);
        assert_eq!(range.last_block_height, 5);
        assert_eq!(range.last_committed_block_height, 5);
    }

    #[tokio::test]
    async fn stays_silent_when_requester_is_not_behind() {
        let dir = TempDir::new().unwrap();
        let (server, transport) = server_with_blocks(&dir, 5, 10);

        server
            .handle_block_availability_request(availability_request(2, 5))
            .await
            .unwrap();
        server
            .handle_block_availability_request(availability_request(2, 9))
            .await
            .unwrap();

        assert!(transport.availability_responses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn serves_a_chunk_clamped_to_batch_size() {
        let dir = TempDir::new().unwrap();
        let (server, transport) = server_with_blocks(&dir, 30, 10);

        server
            .handle_block_sync_request(sync_request(2, 11, 25))
            .await
            .unwrap();

        let responses = transport.sync_responses.lock().unwrap();
        assert_eq!(responses.len(), 1);
        let (recipient, response) = &responses[0];
        assert_eq!(*recipient, test_kit::node_address(2));

        let heights: Vec<u64> = response.block_pairs.iter().map(|b| b.height()).collect();
        assert_eq!(heights, (11..=20).collect::<Vec<_>>());

        let range = response.signed_chunk_range.unwrap();
        assert_eq!(range.first_block_height, 11);
        assert_eq!(range.last_block_height, 20);
        assert_eq!(range.last_committed_block_height, 30);
    }

    #[tokio::test]
    async fn serves_a_narrower_chunk_when_the_store_runs_out() {
        let dir = TempDir::new().unwrap();
        let (server, transport) = server_with_blocks(&dir, 5, 10);

        server
            .handle_block_sync_request(sync_request(2, 3, 20))
            .await
            .unwrap();

        let responses = transport.sync_responses.lock().unwrap();
        let response = &responses[0].1;
        let heights: Vec<u64> = response.block_pairs.iter().map(|b| b.height()).collect();
        assert_eq!(heights, vec![3, 4, 5]);
        assert_eq!(response.signed_chunk_range.unwrap().last_block_height, 5);
    }

    #[tokio::test]
    async fn rejects_a_chunk_request_from_a_caught_up_requester() {
        let dir = TempDir::new().unwrap();
        let (server, transport) = server_with_blocks(&dir, 5, 10);

        let err = server
            .handle_block_sync_request(sync_request(2, 5, 10))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LatticeError::Sync(SyncError::InvalidRange(_))
        ));
        assert!(transport.sync_responses.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_start_height_is_clamped_to_one() {
        let dir = TempDir::new().unwrap();
        let (server, transport) = server_with_blocks(&dir, 5, 3);

        server
            .handle_block_sync_request(sync_request(2, 0, 10))
            .await
            .unwrap();

        let responses = transport.sync_responses.lock().unwrap();
        let heights: Vec<u64> = responses[0].1.block_pairs.iter().map(|b| b.height()).collect();
        assert_eq!(heights, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn malformed_messages_are_rejected_without_panicking() {
        let dir = TempDir::new().unwrap();
        let (server, _transport) = server_with_blocks(&dir, 5, 10);

        let no_sender = BlockAvailabilityRequest {
            sender: None,
            signed_batch_range: availability_request(2, 2).signed_batch_range,
        };
        assert!(matches!(
            server.handle_block_availability_request(no_sender).await,
            Err(LatticeError::Sync(SyncError::MalformedMessage(_)))
        ));

        let no_range = BlockAvailabilityRequest {
            sender: Some(SenderSignature::unsigned(test_kit::node_address(2))),
            signed_batch_range: None,
        };
        assert!(matches!(
            server.handle_block_availability_request(no_range).await,
            Err(LatticeError::Sync(SyncError::MalformedMessage(_)))
        ));

        let no_sender = BlockSyncRequest {
            sender: None,
            signed_chunk_range: sync_request(2, 1, 5).signed_chunk_range,
        };
        assert!(matches!(
            server.handle_block_sync_request(no_sender).await,
            Err(LatticeError::Sync(SyncError::MalformedMessage(_)))
        ));

        let no_range = BlockSyncRequest {
            sender: Some(SenderSignature::unsigned(test_kit::node_address(2))),
            signed_chunk_range: None,
        };
        assert!(matches!(
            server.handle_block_sync_request(no_range).await,
            Err(LatticeError::Sync(SyncError::MalformedMessage(_)))
        ));
    }
}
