use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub const HASH_LENGTH: usize = 32;
pub const NODE_ADDRESS_LENGTH: usize = 20;

/// Block heights are 1-based; height 0 denotes the empty/genesis chain.
pub type BlockHeight = u64;

/// Nanoseconds since the unix epoch.
pub type TimestampNano = u64;

// --- NewTypes ---

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Sha256([u8; HASH_LENGTH]);

impl Sha256 {
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut arr = [0u8; HASH_LENGTH];
        let len = bytes.len().min(HASH_LENGTH);
        arr[..len].copy_from_slice(&bytes[..len]);
        Sha256(arr)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Sha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256({})", hex::encode(self.0))
    }
}

impl fmt::Display for Sha256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for Sha256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Sha256 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        if bytes.len() != HASH_LENGTH {
            return Err(serde::de::Error::custom("invalid hash length"));
        }
        Ok(Sha256::from_slice(&bytes))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct NodeAddress([u8; NODE_ADDRESS_LENGTH]);

impl NodeAddress {
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut arr = [0u8; NODE_ADDRESS_LENGTH];
        let len = bytes.len().min(NODE_ADDRESS_LENGTH);
        arr[..len].copy_from_slice(&bytes[..len]);
        NodeAddress(arr)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeAddress({})", hex::encode(self.0))
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for NodeAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for NodeAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        if bytes.len() != NODE_ADDRESS_LENGTH {
            return Err(serde::de::Error::custom("invalid node address length"));
        }
        Ok(NodeAddress::from_slice(&bytes))
    }
}

// --- Block model ---

/// Header of the transactions half of a block pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionsBlockHeader {
    pub protocol_version: u32,
    pub virtual_chain_id: u32,
    pub block_height: BlockHeight,
    pub prev_block_hash: Sha256,
    pub timestamp: TimestampNano,
    pub transactions_merkle_root: Sha256,
}

/// Opaque per-block metadata carried alongside the transactions block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionsBlockMetadata {
    pub data: Vec<u8>,
}

/// Header of the results half of a block pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsBlockHeader {
    pub protocol_version: u32,
    pub virtual_chain_id: u32,
    pub block_height: BlockHeight,
    pub prev_block_hash: Sha256,
    pub timestamp: TimestampNano,
    pub receipts_merkle_root: Sha256,
    pub state_diff_hash: Sha256,
    pub transactions_block_hash: Sha256,
}

/// Consensus proof attached to each half of a committed block pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockProof {
    pub proof_type: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub protocol_version: u32,
    pub virtual_chain_id: u32,
    pub timestamp: TimestampNano,
    pub payload: Vec<u8>,
    pub signer: NodeAddress,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub tx_hash: Sha256,
    pub execution_result: u32,
    pub output: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractStateDiff {
    pub contract: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionsBlock {
    pub header: TransactionsBlockHeader,
    pub metadata: TransactionsBlockMetadata,
    pub signed_transactions: Vec<SignedTransaction>,
    pub block_proof: BlockProof,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsBlock {
    pub header: ResultsBlockHeader,
    pub transaction_receipts: Vec<TransactionReceipt>,
    pub contract_state_diffs: Vec<ContractStateDiff>,
    pub block_proof: BlockProof,
}

/// The atomic committed unit: a transactions block paired with the results
/// block produced by executing it. Both halves share the same height and
/// logical timestamp. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockPair {
    pub transactions_block: TransactionsBlock,
    pub results_block: ResultsBlock,
}

impl BlockPair {
    pub fn height(&self) -> BlockHeight {
        self.transactions_block.header.block_height
    }

    pub fn timestamp(&self) -> TimestampNano {
        self.transactions_block.header.timestamp
    }
}
