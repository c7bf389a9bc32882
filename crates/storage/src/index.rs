//! In-memory height index over the blocks file, rebuilt by replaying the
//! file at startup and kept current on every write.

use lattice_common::error::StorageError;
use lattice_common::types::{BlockHeight, BlockPair, TimestampNano};
use std::collections::HashMap;
use std::sync::RwLock;

/// One-minute buckets for the receipt-by-timestamp accelerator.
const TS_BUCKET_NANOS: u64 = 60 * 1_000_000_000;

fn ts_bucket_key(ts: TimestampNano) -> u32 {
    (ts / TS_BUCKET_NANOS) as u32
}

#[derive(Debug)]
struct Inner {
    /// height -> [start, end) byte range in the blocks file
    height_offset: HashMap<BlockHeight, (u64, u64)>,
    /// earliest block holding a transaction receipt in each time bucket;
    /// entries are only ever lowered, never raised
    first_block_in_ts_bucket: HashMap<u32, BlockHeight>,
    top_height: BlockHeight,
    in_order_height: BlockHeight,
    top_block: Option<BlockPair>,
    next_offset: u64,
}

#[derive(Debug)]
pub struct BlockHeightIndex {
    inner: RwLock<Inner>,
}

impl BlockHeightIndex {
    pub fn new(first_block_offset: u64) -> Self {
        BlockHeightIndex {
            inner: RwLock::new(Inner {
                height_offset: HashMap::new(),
                first_block_in_ts_bucket: HashMap::new(),
                top_height: 0,
                in_order_height: 0,
                top_block: None,
                next_offset: first_block_offset,
            }),
        }
    }

    /// Checks whether `height` may be appended next. A height at or below the
    /// current top is a benign duplicate; a height beyond top+1 is a gap and
    /// must not advance any file offset.
    pub fn validate_candidate_height(&self, height: BlockHeight) -> Result<(), StorageError> {
        let inner = self.inner.read().expect("height index lock poisoned");
        if height <= inner.in_order_height {
            return Err(StorageError::BlockAlreadyCommitted {
                height,
                top: inner.in_order_height,
            });
        }
        if height != inner.in_order_height + 1 {
            return Err(StorageError::HeightOutOfOrder {
                height,
                expected: inner.in_order_height + 1,
            });
        }
        Ok(())
    }

    /// Records `block` as occupying `[next_offset, end_offset)`. The height
    /// must be exactly one above the current in-order top.
    pub fn append_block(&self, end_offset: u64, block: &BlockPair) -> Result<(), StorageError> {
        let mut inner = self.inner.write().expect("height index lock poisoned");

        let height = block.height();
        if height != inner.in_order_height + 1 {
            return Err(StorageError::HeightOutOfOrder {
                height,
                expected: inner.in_order_height + 1,
            });
        }

        let start_offset = inner.next_offset;
        inner.height_offset.insert(height, (start_offset, end_offset));
        inner.next_offset = end_offset;
        inner.in_order_height = height;
        if height > inner.top_height {
            inner.top_height = height;
        }

        if !block.results_block.transaction_receipts.is_empty() {
            let bucket = ts_bucket_key(block.timestamp());
            let entry = inner.first_block_in_ts_bucket.entry(bucket).or_insert(height);
            if height < *entry {
                *entry = height;
            }
        }

        inner.top_block = Some(block.clone());
        Ok(())
    }

    /// Byte range of the record at `height`, if indexed.
    pub fn block_offset(&self, height: BlockHeight) -> Option<(u64, u64)> {
        let inner = self.inner.read().expect("height index lock poisoned");
        inner.height_offset.get(&height).copied()
    }

    /// File offset where the next record will be appended.
    pub fn next_offset(&self) -> u64 {
        self.inner.read().expect("height index lock poisoned").next_offset
    }

    /// Highest height with no gaps from 1 ("last committed").
    pub fn last_block_height(&self) -> BlockHeight {
        self.inner.read().expect("height index lock poisoned").in_order_height
    }

    /// Highest height seen, possibly ahead of the in-order height mid-sync.
    pub fn top_height(&self) -> BlockHeight {
        self.inner.read().expect("height index lock poisoned").top_height
    }

    pub fn last_block(&self) -> Option<BlockPair> {
        self.inner.read().expect("height index lock poisoned").top_block.clone()
    }

    /// Earliest block that may hold a transaction receipt inside the given
    /// timestamp range, per the coarse time-bucket index.
    pub fn earliest_tx_block_in_range(
        &self,
        range_start: TimestampNano,
        range_end: TimestampNano,
    ) -> Option<BlockHeight> {
        let inner = self.inner.read().expect("height index lock poisoned");
        let from = ts_bucket_key(range_start);
        let to = ts_bucket_key(range_end);
        for bucket in from..=to {
            if let Some(height) = inner.first_block_in_ts_bucket.get(&bucket) {
                return Some(*height);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_common::test_kit;

    #[test]
    fn starts_empty_at_first_block_offset() {
        let index = BlockHeightIndex::new(20);
        assert_eq!(index.last_block_height(), 0);
        assert_eq!(index.top_height(), 0);
        assert_eq!(index.next_offset(), 20);
        assert!(index.last_block().is_none());
        assert!(index.block_offset(1).is_none());
    }

    #[test]
    fn append_tracks_offsets_and_heights() {
        let index = BlockHeightIndex::new(20);
        let b1 = test_kit::block_pair(1);
        let b2 = test_kit::block_pair(2);

        index.append_block(120, &b1).unwrap();
        index.append_block(230, &b2).unwrap();

        assert_eq!(index.block_offset(1), Some((20, 120)));
        assert_eq!(index.block_offset(2), Some((120, 230)));
        assert_eq!(index.next_offset(), 230);
        assert_eq!(index.last_block_height(), 2);
        assert_eq!(index.last_block().unwrap(), b2);
    }

    #[test]
    fn rejects_gaps_and_duplicates() {
        let index = BlockHeightIndex::new(20);
        index.append_block(100, &test_kit::block_pair(1)).unwrap();

        assert!(matches!(
            index.validate_candidate_height(1),
            Err(StorageError::BlockAlreadyCommitted { .. })
        ));
        assert!(matches!(
            index.validate_candidate_height(3),
            Err(StorageError::HeightOutOfOrder { expected: 2, .. })
        ));
        assert!(index.validate_candidate_height(2).is_ok());

        let err = index.append_block(300, &test_kit::block_pair(3)).unwrap_err();
        assert!(matches!(err, StorageError::HeightOutOfOrder { .. }));
        // a refused append must not move the write position
        assert_eq!(index.next_offset(), 100);
    }

    #[test]
    fn ts_buckets_keep_the_earliest_block() {
        let index = BlockHeightIndex::new(0);
        let ts = test_kit::TEST_GENESIS_TIMESTAMP;
        index.append_block(10, &test_kit::block_pair_at(1, ts)).unwrap();
        // same minute bucket, later block: entry must stay at height 1
        index.append_block(20, &test_kit::block_pair_at(2, ts + 1_000_000_000)).unwrap();
        // two minutes later
        index.append_block(30, &test_kit::block_pair_at(3, ts + 120_000_000_000)).unwrap();

        assert_eq!(index.earliest_tx_block_in_range(ts, ts + 1_000_000_000), Some(1));
        assert_eq!(
            index.earliest_tx_block_in_range(ts + 120_000_000_000, ts + 121_000_000_000),
            Some(3)
        );
        assert_eq!(
            index.earliest_tx_block_in_range(ts + 600_000_000_000, ts + 601_000_000_000),
            None
        );
    }

    #[test]
    fn blocks_without_receipts_do_not_claim_buckets() {
        let index = BlockHeightIndex::new(0);
        let mut block = test_kit::block_pair(1);
        block.results_block.transaction_receipts.clear();
        index.append_block(10, &block).unwrap();

        let ts = block.timestamp();
        assert_eq!(index.earliest_tx_block_in_range(ts, ts), None);
    }
}
