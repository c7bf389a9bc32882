//! Gossip message shapes for the block sync protocol.
//!
//! `sender` and range fields are optional at the wire boundary; handlers
//! nil-check them and reject malformed messages instead of panicking.

use lattice_common::types::{BlockHeight, BlockPair, NodeAddress};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockType {
    BlockPair,
}

/// Identity (and eventually signature) of the message originator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenderSignature {
    pub sender_node_address: NodeAddress,
    pub signature: Vec<u8>,
}

impl SenderSignature {
    pub fn unsigned(sender_node_address: NodeAddress) -> Self {
        SenderSignature {
            sender_node_address,
            signature: Vec::new(),
        }
    }
}

/// A height range plus the sender's own committed tip, used both to request
/// blocks and to advertise what a node can serve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockSyncRange {
    pub block_type: BlockType,
    pub first_block_height: BlockHeight,
    pub last_block_height: BlockHeight,
    pub last_committed_block_height: BlockHeight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockAvailabilityRequest {
    pub sender: Option<SenderSignature>,
    pub signed_batch_range: Option<BlockSyncRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockAvailabilityResponse {
    pub sender: Option<SenderSignature>,
    pub signed_batch_range: Option<BlockSyncRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSyncRequest {
    pub sender: Option<SenderSignature>,
    pub signed_chunk_range: Option<BlockSyncRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSyncResponse {
    pub sender: Option<SenderSignature>,
    pub signed_chunk_range: Option<BlockSyncRange>,
    pub block_pairs: Vec<BlockPair>,
}
