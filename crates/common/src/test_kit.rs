//! Deterministic block builders shared by storage and sync tests.

use crate::types::{
    BlockPair, BlockProof, ContractStateDiff, NodeAddress, ResultsBlock, ResultsBlockHeader,
    Sha256, SignedTransaction, TimestampNano, TransactionReceipt, TransactionsBlock,
    TransactionsBlockHeader, TransactionsBlockMetadata,
};

pub const TEST_PROTOCOL_VERSION: u32 = 1;
pub const TEST_VIRTUAL_CHAIN_ID: u32 = 42;

/// Base timestamp for generated chains; successive heights are one second apart.
pub const TEST_GENESIS_TIMESTAMP: TimestampNano = 1_700_000_000_000_000_000;

fn pseudo_hash(tag: u8, height: u64, index: u64) -> Sha256 {
    let mut bytes = [0u8; 32];
    bytes[0] = tag;
    bytes[1..9].copy_from_slice(&height.to_le_bytes());
    bytes[9..17].copy_from_slice(&index.to_le_bytes());
    Sha256::from_slice(&bytes)
}

/// Deterministic hash of the transaction at `index` within block `height`.
pub fn tx_hash(height: u64, index: u64) -> Sha256 {
    pseudo_hash(b't', height, index)
}

pub fn node_address(seed: u8) -> NodeAddress {
    NodeAddress::from_slice(&[seed; 20])
}

/// A fully populated block pair at the given height and timestamp, with two
/// transactions, matching receipts, and one state diff.
pub fn block_pair_at(height: u64, timestamp: TimestampNano) -> BlockPair {
    let prev_block_hash = if height > 1 {
        pseudo_hash(b'b', height - 1, 0)
    } else {
        Sha256::default()
    };

    let signed_transactions: Vec<SignedTransaction> = (0..2)
        .map(|i| SignedTransaction {
            protocol_version: TEST_PROTOCOL_VERSION,
            virtual_chain_id: TEST_VIRTUAL_CHAIN_ID,
            timestamp,
            payload: format!("transfer-{}-{}", height, i).into_bytes(),
            signer: node_address(7),
            signature: vec![i as u8; 64],
        })
        .collect();

    let transaction_receipts: Vec<TransactionReceipt> = (0..2)
        .map(|i| TransactionReceipt {
            tx_hash: tx_hash(height, i),
            execution_result: 0,
            output: vec![height as u8, i as u8],
        })
        .collect();

    BlockPair {
        transactions_block: TransactionsBlock {
            header: TransactionsBlockHeader {
                protocol_version: TEST_PROTOCOL_VERSION,
                virtual_chain_id: TEST_VIRTUAL_CHAIN_ID,
                block_height: height,
                prev_block_hash,
                timestamp,
                transactions_merkle_root: pseudo_hash(b'm', height, 0),
            },
            metadata: TransactionsBlockMetadata {
                data: height.to_le_bytes().to_vec(),
            },
            signed_transactions,
            block_proof: BlockProof {
                proof_type: 1,
                data: vec![0xAB; 32],
            },
        },
        results_block: ResultsBlock {
            header: ResultsBlockHeader {
                protocol_version: TEST_PROTOCOL_VERSION,
                virtual_chain_id: TEST_VIRTUAL_CHAIN_ID,
                block_height: height,
                prev_block_hash,
                timestamp,
                receipts_merkle_root: pseudo_hash(b'r', height, 0),
                state_diff_hash: pseudo_hash(b's', height, 0),
                transactions_block_hash: pseudo_hash(b'b', height, 0),
            },
            transaction_receipts,
            contract_state_diffs: vec![ContractStateDiff {
                contract: "token".to_string(),
                key: b"balance".to_vec(),
                value: height.to_le_bytes().to_vec(),
            }],
            block_proof: BlockProof {
                proof_type: 1,
                data: vec![0xCD; 32],
            },
        },
    }
}

/// A block pair at the given height with a timestamp derived from the height.
pub fn block_pair(height: u64) -> BlockPair {
    block_pair_at(height, TEST_GENESIS_TIMESTAMP + height * 1_000_000_000)
}

/// A chain of `n` block pairs at heights `1..=n`.
pub fn chain(n: u64) -> Vec<BlockPair> {
    (1..=n).map(block_pair).collect()
}
