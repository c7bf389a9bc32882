//! Pull-sync control loop: idle until commits stop arriving, then broadcast
//! an availability request, pick the best-advertised peer, pull one chunk of
//! blocks and commit it through the storage gate, and repeat while progress
//! is made.
//!
//! Every state's processor returns the next state, or `None` on shutdown.
//! Transport failures and timeouts always fall back to [`SyncState::Idle`];
//! the next no-commit timeout drives the retry, so a partitioned peer never
//! causes a retry storm.

use crate::config::SyncConfig;
use crate::gossip::BlockSyncTransport;
use crate::messages::{
    BlockAvailabilityRequest, BlockAvailabilityResponse, BlockSyncRange, BlockSyncRequest,
    BlockSyncResponse, BlockType, SenderSignature,
};
use crate::metrics::SyncMetrics;
use crate::storage::BlockSyncStorage;
use lattice_common::error::Result;
use lattice_common::types::{BlockHeight, NodeAddress};
use prometheus::Registry;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Inputs fed into the sync loop from the outside world.
#[derive(Debug)]
pub enum SyncEvent {
    /// A block was committed locally, by any path including consensus.
    BlockCommitted,
    AvailabilityResponse(BlockAvailabilityResponse),
    BlockChunk(BlockSyncResponse),
}

#[derive(Debug)]
pub enum SyncState {
    Idle,
    CollectingAvailabilityResponses,
    FinishedCollecting(Vec<BlockAvailabilityResponse>),
    WaitingForChunks(NodeAddress),
    ProcessingBlocks(BlockSyncResponse),
}

impl SyncState {
    fn label(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::CollectingAvailabilityResponses => "collecting_availability_responses",
            SyncState::FinishedCollecting(_) => "finished_collecting",
            SyncState::WaitingForChunks(_) => "waiting_for_chunks",
            SyncState::ProcessingBlocks(_) => "processing_blocks",
        }
    }
}

/// Cloneable front door for feeding events into a running [`BlockSync`].
#[derive(Clone)]
pub struct BlockSyncHandle {
    events: mpsc::Sender<SyncEvent>,
}

impl BlockSyncHandle {
    /// Resets the idle no-commit timer. Dropping the event on a full queue
    /// is harmless; any queued event already resets the timer.
    pub fn notify_block_committed(&self) {
        let _ = self.events.try_send(SyncEvent::BlockCommitted);
    }

    pub async fn handle_block_availability_response(&self, response: BlockAvailabilityResponse) {
        let _ = self
            .events
            .send(SyncEvent::AvailabilityResponse(response))
            .await;
    }

    pub async fn handle_block_sync_response(&self, response: BlockSyncResponse) {
        let _ = self.events.send(SyncEvent::BlockChunk(response)).await;
    }
}

pub struct BlockSync<T, S> {
    config: SyncConfig,
    transport: Arc<T>,
    storage: Arc<S>,
    events: mpsc::Receiver<SyncEvent>,
    shutdown: watch::Receiver<bool>,
    metrics: SyncMetrics,
}

impl<T: BlockSyncTransport, S: BlockSyncStorage> BlockSync<T, S> {
    pub fn new(
        config: SyncConfig,
        transport: Arc<T>,
        storage: Arc<S>,
        shutdown: watch::Receiver<bool>,
        registry: &Registry,
    ) -> Result<(Self, BlockSyncHandle)> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let sync = BlockSync {
            config,
            transport,
            storage,
            events: rx,
            shutdown,
            metrics: SyncMetrics::new(registry)?,
        };
        Ok((sync, BlockSyncHandle { events: tx }))
    }

    /// Drives the state machine until shutdown. A freshly started node goes
    /// straight into a collection round instead of waiting out the idle
    /// timer.
    pub async fn run(mut self) {
        info!("block sync started");
        let mut state = SyncState::CollectingAvailabilityResponses;
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            self.metrics.record_state(state.label());
            let next = match state {
                SyncState::Idle => self.process_idle().await,
                SyncState::CollectingAvailabilityResponses => self.process_collecting().await,
                SyncState::FinishedCollecting(responses) => {
                    self.process_finished_collecting(responses).await
                }
                SyncState::WaitingForChunks(source) => {
                    self.process_waiting_for_chunks(source).await
                }
                SyncState::ProcessingBlocks(response) => self.process_blocks(response).await,
            };
            match next {
                Some(next) => state = next,
                None => break,
            }
        }
        info!("block sync stopped");
    }

    /// Waits out the no-commit interval, restarting it whenever a local
    /// commit is reported.
    async fn process_idle(&mut self) -> Option<SyncState> {
        let timer = sleep_until(Instant::now() + self.config.no_commit_interval);
        tokio::pin!(timer);
        loop {
            tokio::select! {
                _ = &mut timer => return Some(SyncState::CollectingAvailabilityResponses),
                _ = self.shutdown.changed() => return None,
                event = self.events.recv() => match event {
                    Some(SyncEvent::BlockCommitted) => {
                        timer
                            .as_mut()
                            .reset(Instant::now() + self.config.no_commit_interval);
                    }
                    // responses left over from a previous round
                    Some(_) => {}
                    None => return None,
                },
            }
        }
    }

    async fn process_collecting(&mut self) -> Option<SyncState> {
        if self.config.batch_size == 0 {
            warn!("block sync batch size is zero, skipping sync round");
            return Some(SyncState::Idle);
        }
        let batch = u64::from(self.config.batch_size);

        // pre-sync consistency refresh, consensus re-anchors to the tip
        self.storage
            .update_consensus_algos_about_latest_committed_block()
            .await;
        let last_committed = self.storage.last_committed_block_height().await;

        let request = BlockAvailabilityRequest {
            sender: Some(SenderSignature::unsigned(self.config.node_address)),
            signed_batch_range: Some(BlockSyncRange {
                block_type: BlockType::BlockPair,
                first_block_height: last_committed + 1,
                last_block_height: last_committed + batch,
                last_committed_block_height: last_committed,
            }),
        };
        if let Err(err) = self
            .transport
            .broadcast_block_availability_request(request)
            .await
        {
            warn!(error = %err, "block availability broadcast failed");
            return Some(SyncState::Idle);
        }
        self.metrics.availability_broadcasts.inc();
        debug!(
            first = last_committed + 1,
            last = last_committed + batch,
            "broadcast block availability request"
        );

        let deadline = Instant::now() + self.config.collect_response_timeout;
        let mut responses = Vec::new();
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => {
                    return Some(SyncState::FinishedCollecting(responses));
                }
                _ = self.shutdown.changed() => return None,
                event = self.events.recv() => match event {
                    Some(SyncEvent::AvailabilityResponse(response)) => {
                        match (&response.sender, &response.signed_batch_range) {
                            (Some(sender), Some(range)) => {
                                if range.last_committed_block_height <= last_committed {
                                    debug!(
                                        sender = %sender.sender_node_address,
                                        theirs = range.last_committed_block_height,
                                        "ignoring availability response from a peer not ahead of us"
                                    );
                                } else {
                                    responses.push(response);
                                }
                            }
                            _ => debug!("ignoring malformed availability response"),
                        }
                    }
                    Some(_) => {}
                    None => return None,
                },
            }
        }
    }

    /// Picks the peer advertising the highest committed height; ties go to
    /// the first responder.
    async fn process_finished_collecting(
        &mut self,
        responses: Vec<BlockAvailabilityResponse>,
    ) -> Option<SyncState> {
        if responses.is_empty() {
            debug!("no availability responses this round");
            return Some(SyncState::Idle);
        }

        let mut best: Option<(NodeAddress, BlockHeight)> = None;
        for response in &responses {
            let (Some(sender), Some(range)) = (&response.sender, &response.signed_batch_range)
            else {
                continue;
            };
            match best {
                Some((_, advertised)) if range.last_committed_block_height <= advertised => {}
                _ => best = Some((sender.sender_node_address, range.last_committed_block_height)),
            }
        }

        match best {
            Some((source, advertised)) => {
                debug!(
                    source = %source,
                    advertised,
                    candidates = responses.len(),
                    "chose block sync source"
                );
                Some(SyncState::WaitingForChunks(source))
            }
            None => Some(SyncState::Idle),
        }
    }

    async fn process_waiting_for_chunks(&mut self, source: NodeAddress) -> Option<SyncState> {
        let batch = u64::from(self.config.batch_size.max(1));
        let last_committed = self.storage.last_committed_block_height().await;

        let request = BlockSyncRequest {
            sender: Some(SenderSignature::unsigned(self.config.node_address)),
            signed_chunk_range: Some(BlockSyncRange {
                block_type: BlockType::BlockPair,
                first_block_height: last_committed + 1,
                last_block_height: last_committed + batch,
                last_committed_block_height: last_committed,
            }),
        };
        if let Err(err) = self.transport.send_block_sync_request(source, request).await {
            warn!(source = %source, error = %err, "block sync request failed");
            return Some(SyncState::Idle);
        }
        debug!(source = %source, first = last_committed + 1, "requested block chunk");

        let deadline = Instant::now() + self.config.collect_chunks_timeout;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => {
                    debug!(source = %source, "timed out waiting for block chunk");
                    return Some(SyncState::Idle);
                }
                _ = self.shutdown.changed() => return None,
                event = self.events.recv() => match event {
                    Some(SyncEvent::BlockChunk(response)) => match &response.sender {
                        Some(sender) if sender.sender_node_address == source => {
                            return Some(SyncState::ProcessingBlocks(response));
                        }
                        _ => warn!(
                            source = %source,
                            "discarding block chunk from unexpected sender"
                        ),
                    },
                    Some(_) => {}
                    None => return None,
                },
            }
        }
    }

    /// Validates and commits every block of the chunk in order, aborting on
    /// the first failure. Stale heights are pushed through the commit gate
    /// unchanged; the store treats them as benign duplicates.
    async fn process_blocks(&mut self, response: BlockSyncResponse) -> Option<SyncState> {
        if response.block_pairs.is_empty() {
            warn!("received an empty block chunk");
            return Some(SyncState::Idle);
        }

        let mut committed = 0u64;
        for block in &response.block_pairs {
            let height = block.height();
            if let Err(err) = self.storage.validate_block_for_commit(block).await {
                warn!(height, error = %err, "block failed validation, aborting chunk");
                self.metrics.failed_commits.inc();
                break;
            }
            if let Err(err) = self.storage.commit_block(block).await {
                warn!(height, error = %err, "block commit failed, aborting chunk");
                self.metrics.failed_commits.inc();
                break;
            }
            committed += 1;
            self.metrics.committed_blocks.inc();
        }
        self.storage
            .update_consensus_algos_about_latest_committed_block()
            .await;

        if committed == 0 {
            return Some(SyncState::Idle);
        }
        debug!(committed, "committed block sync chunk");
        // a gap may remain, keep pulling instead of waiting out the idle timer
        Some(SyncState::CollectingAvailabilityResponses)
    }
}
