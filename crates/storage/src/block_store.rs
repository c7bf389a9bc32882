//! Durable, crash-consistent, exclusive-writer storage of the append-only
//! block sequence.

use crate::codec::{BlockCodec, BlocksFileHeader, BLOCKS_FILE_HEADER_SIZE};
use crate::config::BlockStorageConfig;
use crate::index::BlockHeightIndex;
use crate::tracker::BlockTracker;
use fs2::FileExt;
use lattice_common::error::{CodecError, LatticeError, Result, StorageError};
use lattice_common::types::{BlockHeight, BlockPair, Sha256, TimestampNano};
use prometheus::{IntGauge, Registry};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info, warn};

const BLOCKS_FILENAME: &str = "blocks";

#[derive(Debug)]
struct StoreMetrics {
    size_on_disk: IntGauge,
}

impl StoreMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let size_on_disk = IntGauge::new(
            "lattice_block_storage_size_bytes",
            "Size of the blocks file on disk",
        )
        .map_err(|e| LatticeError::Internal(e.to_string()))?;
        registry
            .register(Box::new(size_on_disk.clone()))
            .map_err(|e| LatticeError::Internal(e.to_string()))?;
        Ok(StoreMetrics { size_on_disk })
    }
}

#[derive(Debug)]
pub struct BlockStore {
    codec: BlockCodec,
    index: BlockHeightIndex,
    tracker: BlockTracker,
    /// Write cursor into the blocks file; all writers serialize here. Reads
    /// go through independently seeked handles and never touch this cursor.
    writer: Mutex<File>,
    metrics: StoreMetrics,
    path: PathBuf,
}

impl BlockStore {
    /// Opens (or creates) the blocks file under `config.data_dir`, takes the
    /// OS-level exclusive lock, validates the file header and rebuilds the
    /// height index by replaying the file. Fatal on lock or header mismatch;
    /// a corrupted trailing record is logged and treated as the end of valid
    /// data.
    pub fn open(config: BlockStorageConfig, registry: &Registry) -> Result<Self> {
        let codec = BlockCodec::new(config.max_block_size_bytes);

        std::fs::create_dir_all(&config.data_dir)?;
        let path = config.data_dir.join(BLOCKS_FILENAME);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|source| StorageError::LockFailed {
                path: path.display().to_string(),
                source,
            })?;

        let first_block_offset = validate_file_header(&mut file, &config, &path)?;

        let index = BlockHeightIndex::new(first_block_offset);
        build_index(&mut file, first_block_offset, &codec, &index)?;

        file.seek(SeekFrom::Start(index.next_offset()))?;

        let tracker = BlockTracker::new(
            index.last_block_height(),
            config.tracker_grace_distance,
            config.tracker_grace_timeout,
        );
        let metrics = StoreMetrics::new(registry)?;
        metrics.size_on_disk.set(index.next_offset() as i64);

        info!(
            path = %path.display(),
            height = index.last_block_height(),
            "opened blocks file"
        );

        Ok(BlockStore {
            codec,
            index,
            tracker,
            writer: Mutex::new(file),
            metrics,
            path,
        })
    }

    /// Appends `block` when its height is exactly one above the current top.
    /// A height at or below the top is tolerated silently (`Ok(false)`,
    /// duplicate delivery); a gap is a hard error. The record is fsynced
    /// before the index and tracker observe it.
    pub fn write_next_block(&self, block: &BlockPair) -> Result<bool> {
        let mut file = self.writer.lock().expect("block writer lock poisoned");

        let height = block.height();
        match self.index.validate_candidate_height(height) {
            Err(StorageError::BlockAlreadyCommitted { top, .. }) => {
                debug!(height, top, "ignoring re-delivered block");
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
            Ok(()) => {}
        }

        // encode to memory first so a refused record writes nothing
        let mut buf = Vec::new();
        let n = self.codec.encode(block, &mut buf)?;
        file.write_all(&buf)?;
        file.sync_data()?;

        let start = self.index.next_offset();
        self.index.append_block(start + n as u64, block)?;
        self.tracker.increment_height();
        self.metrics.size_on_disk.add(n as i64);

        debug!(height, bytes = n, "wrote block");
        Ok(true)
    }

    /// Decodes blocks page-by-page starting at `from`, invoking `cursor`
    /// with each page; a `false` return stops the scan early. The scan uses
    /// its own file handle and picks up blocks committed while it runs.
    pub fn scan_blocks<F>(&self, from: BlockHeight, page_size: u8, mut cursor: F) -> Result<()>
    where
        F: FnMut(BlockHeight, &[BlockPair]) -> bool,
    {
        let mut in_order = self.index.last_block_height();
        if from == 0 || in_order < from {
            return Err(StorageError::InvalidScanRange {
                from,
                top: in_order,
            }
            .into());
        }

        let page_size = page_size.max(1) as u64;
        let mut file = File::open(&self.path)?;

        let mut from_height = from;
        let mut wants_more = true;
        let mut eof = false;
        while from_height <= in_order && wants_more && !eof {
            let to_height = (from_height + page_size - 1).min(in_order);
            let mut page = Vec::with_capacity(page_size as usize);
            for height in from_height..=to_height {
                match self.fetch_block_from_file(height, &mut file) {
                    Ok(block) => page.push(block),
                    Err(LatticeError::Codec(CodecError::UnexpectedEof)) => {
                        eof = true;
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
            if !page.is_empty() {
                wants_more = cursor(page[0].height(), &page);
            }
            in_order = self.index.last_block_height();
            from_height = to_height + 1;
        }
        Ok(())
    }

    pub fn get_last_block_height(&self) -> BlockHeight {
        self.index.last_block_height()
    }

    pub fn get_last_block(&self) -> Option<BlockPair> {
        self.index.last_block()
    }

    /// Random-access read of a single committed block.
    pub fn get_block(&self, height: BlockHeight) -> Result<BlockPair> {
        let mut file = File::open(&self.path)?;
        self.fetch_block_from_file(height, &mut file)
    }

    /// Finds the block holding a receipt for `tx_hash` with a block timestamp
    /// inside `[min_ts, max_ts]`, along with the receipt's index within the
    /// block. Uses the time-bucket index to pick the earliest plausible
    /// block, then scans forward until the timestamp range is exhausted.
    pub fn get_block_by_tx(
        &self,
        tx_hash: &Sha256,
        min_ts: TimestampNano,
        max_ts: TimestampNano,
    ) -> Result<Option<(BlockPair, usize)>> {
        let scan_from = match self.index.earliest_tx_block_in_range(min_ts, max_ts) {
            Some(height) => height,
            None => return Ok(None),
        };

        let mut found = None;
        self.scan_blocks(scan_from, 1, |_, page| {
            let block = &page[0];
            let ts = block.timestamp();
            if ts > max_ts {
                return false;
            }
            if ts < min_ts {
                return true;
            }
            for (i, receipt) in block.results_block.transaction_receipts.iter().enumerate() {
                if receipt.tx_hash == *tx_hash {
                    found = Some((block.clone(), i));
                    return false;
                }
            }
            true
        })?;
        Ok(found)
    }

    pub fn block_tracker(&self) -> &BlockTracker {
        &self.tracker
    }

    /// Flushes the blocks file. The exclusive lock is released when the
    /// store is dropped.
    pub fn close(&self) -> Result<()> {
        let file = self.writer.lock().expect("block writer lock poisoned");
        file.sync_all()?;
        info!(path = %self.path.display(), "closed blocks file");
        Ok(())
    }

    fn fetch_block_from_file(&self, height: BlockHeight, file: &mut File) -> Result<BlockPair> {
        let (start, _) = self
            .index
            .block_offset(height)
            .ok_or(StorageError::BlockNotFound { height })?;
        file.seek(SeekFrom::Start(start))?;
        let (block, _) = self.codec.decode(file)?;
        Ok(block)
    }
}

/// Writes the file header when the file is empty, then validates it. Returns
/// the offset of the first block record.
fn validate_file_header(
    file: &mut File,
    config: &BlockStorageConfig,
    path: &std::path::Path,
) -> Result<u64> {
    if file.metadata()?.len() == 0 {
        info!(path = %path.display(), "creating new blocks file");
        let header = BlocksFileHeader {
            network_id: config.network_id,
            virtual_chain_id: config.virtual_chain_id,
        };
        header.write(file)?;
        file.sync_data()?;
    }

    file.seek(SeekFrom::Start(0))?;
    let header = BlocksFileHeader::read(file)?;
    if header.network_id != config.network_id {
        return Err(StorageError::NetworkIdMismatch {
            found: header.network_id,
            expected: config.network_id,
        }
        .into());
    }
    if header.virtual_chain_id != config.virtual_chain_id {
        return Err(StorageError::ChainIdMismatch {
            found: header.virtual_chain_id,
            expected: config.virtual_chain_id,
        }
        .into());
    }
    Ok(BLOCKS_FILE_HEADER_SIZE)
}

/// Replays the blocks file once, recording every valid record. Stops cleanly
/// at end of file; an invalid trailing record is logged and everything after
/// it is treated as unrecoverable tail corruption, not a fatal error.
fn build_index(
    file: &mut File,
    first_block_offset: u64,
    codec: &BlockCodec,
    index: &BlockHeightIndex,
) -> Result<()> {
    file.seek(SeekFrom::Start(first_block_offset))?;
    let mut reader = BufReader::with_capacity(1024 * 1024, &mut *file);
    let mut offset = first_block_offset;
    loop {
        match codec.decode(&mut reader) {
            Ok((block, size)) => {
                index.append_block(offset + size as u64, &block)?;
                offset += size as u64;
            }
            Err(CodecError::UnexpectedEof) => {
                info!(
                    valid_block_bytes = offset,
                    height = index.last_block_height(),
                    "built block height index"
                );
                break;
            }
            Err(err) => {
                warn!(
                    valid_block_bytes = offset,
                    height = index.last_block_height(),
                    error = %err,
                    "built block height index, ignoring invalid trailing block records"
                );
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_common::test_kit;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> BlockStorageConfig {
        BlockStorageConfig {
            data_dir: dir.path().to_path_buf(),
            max_block_size_bytes: 1024 * 1024,
            ..Default::default()
        }
    }

    fn open_store(dir: &TempDir) -> BlockStore {
        BlockStore::open(test_config(dir), &Registry::new()).unwrap()
    }

    #[test]
    fn starts_empty_on_a_fresh_directory() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert_eq!(store.get_last_block_height(), 0);
        assert!(store.get_last_block().is_none());
    }

    #[test]
    fn writes_and_reads_back_blocks() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        for block in test_kit::chain(5) {
            assert!(store.write_next_block(&block).unwrap());
        }

        assert_eq!(store.get_last_block_height(), 5);
        assert_eq!(store.get_last_block().unwrap(), test_kit::block_pair(5));
        assert_eq!(store.get_block(3).unwrap(), test_kit::block_pair(3));
        assert!(matches!(
            store.get_block(9),
            Err(LatticeError::Storage(StorageError::BlockNotFound { height: 9 }))
        ));
    }

    #[test]
    fn tolerates_duplicates_and_rejects_gaps() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert!(store.write_next_block(&test_kit::block_pair(1)).unwrap());
        // re-delivery of an old height is a silent no-op
        assert!(!store.write_next_block(&test_kit::block_pair(1)).unwrap());
        assert_eq!(store.get_last_block_height(), 1);

        let err = store.write_next_block(&test_kit::block_pair(3)).unwrap_err();
        assert!(matches!(
            err,
            LatticeError::Storage(StorageError::HeightOutOfOrder { expected: 2, .. })
        ));

        assert!(store.write_next_block(&test_kit::block_pair(2)).unwrap());
    }

    #[test]
    fn reopen_rebuilds_the_index_from_disk() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir);
            for block in test_kit::chain(3) {
                store.write_next_block(&block).unwrap();
            }
            store.close().unwrap();
        }

        let store = open_store(&dir);
        assert_eq!(store.get_last_block_height(), 3);
        assert_eq!(store.get_last_block().unwrap(), test_kit::block_pair(3));
        assert!(store.write_next_block(&test_kit::block_pair(4)).unwrap());
    }

    #[test]
    fn reopen_with_other_chain_id_is_fatal() {
        let dir = TempDir::new().unwrap();
        drop(open_store(&dir));

        let config = BlockStorageConfig {
            virtual_chain_id: 43,
            ..test_config(&dir)
        };
        let err = BlockStore::open(config, &Registry::new()).unwrap_err();
        assert!(matches!(
            err,
            LatticeError::Storage(StorageError::ChainIdMismatch {
                found: 42,
                expected: 43
            })
        ));
    }

    #[test]
    fn second_open_cannot_take_the_exclusive_lock() {
        let dir = TempDir::new().unwrap();
        let _store = open_store(&dir);

        let err = BlockStore::open(test_config(&dir), &Registry::new()).unwrap_err();
        assert!(matches!(
            err,
            LatticeError::Storage(StorageError::LockFailed { .. })
        ));
    }

    #[test]
    fn garbage_tail_is_truncated_on_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir);
            for block in test_kit::chain(2) {
                store.write_next_block(&block).unwrap();
            }
        }

        let path = dir.path().join(BLOCKS_FILENAME);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xFF; 33]).unwrap();
        drop(file);

        let store = open_store(&dir);
        assert_eq!(store.get_last_block_height(), 2);
        // new writes land where the valid data ended
        assert!(store.write_next_block(&test_kit::block_pair(3)).unwrap());
        assert_eq!(store.get_block(3).unwrap(), test_kit::block_pair(3));
    }

    #[test]
    fn torn_trailing_record_is_truncated_on_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir);
            for block in test_kit::chain(3) {
                store.write_next_block(&block).unwrap();
            }
        }

        let path = dir.path().join(BLOCKS_FILENAME);
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 10).unwrap();
        drop(file);

        let store = open_store(&dir);
        assert_eq!(store.get_last_block_height(), 2);
    }

    #[test]
    fn scan_delivers_pages_and_honors_early_stop() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        for block in test_kit::chain(5) {
            store.write_next_block(&block).unwrap();
        }

        let mut pages = Vec::new();
        store
            .scan_blocks(1, 2, |first, page| {
                pages.push((first, page.iter().map(|b| b.height()).collect::<Vec<_>>()));
                true
            })
            .unwrap();
        assert_eq!(
            pages,
            vec![(1, vec![1, 2]), (3, vec![3, 4]), (5, vec![5])]
        );

        let mut calls = 0;
        store
            .scan_blocks(1, 2, |_, _| {
                calls += 1;
                false
            })
            .unwrap();
        assert_eq!(calls, 1);
    }

    #[test]
    fn scan_rejects_unsupported_start_heights() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.write_next_block(&test_kit::block_pair(1)).unwrap();

        assert!(store.scan_blocks(0, 1, |_, _| true).is_err());
        assert!(store.scan_blocks(2, 1, |_, _| true).is_err());
    }

    #[test]
    fn finds_blocks_by_transaction_hash() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        for block in test_kit::chain(5) {
            store.write_next_block(&block).unwrap();
        }

        let wanted = test_kit::tx_hash(3, 1);
        let ts = test_kit::block_pair(3).timestamp();
        let (block, index) = store
            .get_block_by_tx(&wanted, ts - 1_000_000_000, ts + 1_000_000_000)
            .unwrap()
            .expect("receipt should be found");
        assert_eq!(block.height(), 3);
        assert_eq!(index, 1);

        // unknown hash inside a populated range
        let missing = test_kit::tx_hash(99, 0);
        assert!(store
            .get_block_by_tx(&missing, ts, ts)
            .unwrap()
            .is_none());

        // range with no bucket entries at all
        assert!(store.get_block_by_tx(&wanted, 0, 1).unwrap().is_none());
    }

    #[tokio::test]
    async fn commits_release_tracker_waiters() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(open_store(&dir));
        store.write_next_block(&test_kit::block_pair(1)).unwrap();
        assert_eq!(store.block_tracker().current_height(), 1);

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.block_tracker().wait_for_block(2).await })
        };
        tokio::task::yield_now().await;

        store.write_next_block(&test_kit::block_pair(2)).unwrap();
        waiter.await.unwrap().unwrap();
    }
}
