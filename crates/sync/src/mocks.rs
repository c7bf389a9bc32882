//! Recording test doubles for the gossip transport and the commit gate.

use crate::gossip::BlockSyncTransport;
use crate::messages::{
    BlockAvailabilityRequest, BlockAvailabilityResponse, BlockSyncRequest, BlockSyncResponse,
};
use crate::storage::BlockSyncStorage;
use async_trait::async_trait;
use lattice_common::error::{LatticeError, Result, SyncError};
use lattice_common::types::{BlockHeight, BlockPair, NodeAddress};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Transport that records every outgoing message; all sends fail when
/// `fail_sends` is set.
#[derive(Default)]
pub struct RecordingTransport {
    pub broadcasts: Mutex<Vec<BlockAvailabilityRequest>>,
    pub availability_responses: Mutex<Vec<(NodeAddress, BlockAvailabilityResponse)>>,
    pub sync_requests: Mutex<Vec<(NodeAddress, BlockSyncRequest)>>,
    pub sync_responses: Mutex<Vec<(NodeAddress, BlockSyncResponse)>>,
    pub fail_sends: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self) -> Result<(), SyncError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("injected send failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlockSyncTransport for RecordingTransport {
    async fn broadcast_block_availability_request(
        &self,
        request: BlockAvailabilityRequest,
    ) -> Result<(), SyncError> {
        self.check()?;
        self.broadcasts.lock().unwrap().push(request);
        Ok(())
    }

    async fn send_block_availability_response(
        &self,
        recipient: NodeAddress,
        response: BlockAvailabilityResponse,
    ) -> Result<(), SyncError> {
        self.check()?;
        self.availability_responses
            .lock()
            .unwrap()
            .push((recipient, response));
        Ok(())
    }

    async fn send_block_sync_request(
        &self,
        recipient: NodeAddress,
        request: BlockSyncRequest,
    ) -> Result<(), SyncError> {
        self.check()?;
        self.sync_requests.lock().unwrap().push((recipient, request));
        Ok(())
    }

    async fn send_block_sync_response(
        &self,
        recipient: NodeAddress,
        response: BlockSyncResponse,
    ) -> Result<(), SyncError> {
        self.check()?;
        self.sync_responses
            .lock()
            .unwrap()
            .push((recipient, response));
        Ok(())
    }
}

/// Commit gate that tracks calls and can be scripted to fail at a given
/// height. The committed height only advances on successful commits.
pub struct ScriptedStorage {
    pub height: AtomicU64,
    pub validated: Mutex<Vec<BlockHeight>>,
    pub committed: Mutex<Vec<BlockHeight>>,
    pub consensus_refreshes: AtomicU64,
    pub fail_validate_at: Option<BlockHeight>,
    pub fail_commit_at: Option<BlockHeight>,
}

impl ScriptedStorage {
    pub fn at_height(height: BlockHeight) -> Self {
        ScriptedStorage {
            height: AtomicU64::new(height),
            validated: Mutex::new(Vec::new()),
            committed: Mutex::new(Vec::new()),
            consensus_refreshes: AtomicU64::new(0),
            fail_validate_at: None,
            fail_commit_at: None,
        }
    }
}

#[async_trait]
impl BlockSyncStorage for ScriptedStorage {
    async fn last_committed_block_height(&self) -> BlockHeight {
        self.height.load(Ordering::SeqCst)
    }

    async fn validate_block_for_commit(&self, block: &BlockPair) -> Result<()> {
        let height = block.height();
        self.validated.lock().unwrap().push(height);
        if self.fail_validate_at == Some(height) {
            return Err(LatticeError::Internal("injected validation failure".into()));
        }
        Ok(())
    }

    async fn commit_block(&self, block: &BlockPair) -> Result<()> {
        let height = block.height();
        self.committed.lock().unwrap().push(height);
        if self.fail_commit_at == Some(height) {
            return Err(LatticeError::Internal("injected commit failure".into()));
        }
        self.height.fetch_max(height, Ordering::SeqCst);
        Ok(())
    }

    async fn update_consensus_algos_about_latest_committed_block(&self) {
        self.consensus_refreshes.fetch_add(1, Ordering::SeqCst);
    }
}
