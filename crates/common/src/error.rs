use crate::types::BlockHeight;
use thiserror::Error;

/// Common error types for the lattice node core.
#[derive(Error, Debug)]
pub enum LatticeError {
    /// Block record encoding/decoding errors
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Block persistence errors
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Block sync protocol errors
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Block tracker errors
    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Block record format errors. These terminate the current decode or
/// index-build attempt but never corrupt already-indexed state.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid file magic number {found:#010x}")]
    BadFileMagic { found: u32 },

    #[error("invalid file version {found}")]
    BadFileVersion { found: u32 },

    #[error("invalid block magic number {found:#010x}")]
    BadBlockMagic { found: u32 },

    #[error("invalid block version {found}")]
    BadBlockVersion { found: u32 },

    #[error("{section} checksum mismatch: computed {computed:#010x}, recorded {recorded:#010x}")]
    ChecksumMismatch {
        section: &'static str,
        computed: u32,
        recorded: u32,
    },

    #[error("block size {size} exceeds max limit {limit}")]
    SizeBudgetExceeded { size: usize, limit: usize },

    #[error("block size mismatch: declared {declared}, read {read}")]
    SizeMismatch { declared: usize, read: usize },

    /// Clean end of stream before any byte of the next record.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("payload encoding failed: {0}")]
    Payload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Block persistence errors. Ordering errors are surfaced so the caller can
/// distinguish benign duplicate delivery from a fork signal.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to acquire exclusive lock on blocks file {path}: {source}")]
    LockFailed {
        path: String,
        source: std::io::Error,
    },

    #[error("blocks file network id mismatch: found {found}, expected {expected}")]
    NetworkIdMismatch { found: u32, expected: u32 },

    #[error("blocks file virtual chain id mismatch: found {found}, expected {expected}")]
    ChainIdMismatch { found: u32, expected: u32 },

    #[error("block height {height} is already committed (top is {top})")]
    BlockAlreadyCommitted { height: BlockHeight, top: BlockHeight },

    #[error("block height {height} is out of order (expected {expected})")]
    HeightOutOfOrder {
        height: BlockHeight,
        expected: BlockHeight,
    },

    #[error("block height {height} not found in index")]
    BlockNotFound { height: BlockHeight },

    #[error("unsupported scan start height {from} (last committed is {top})")]
    InvalidScanRange { from: BlockHeight, top: BlockHeight },
}

/// Block sync protocol errors. Transport failures push the state machine
/// back to idle; they are never retried at the transport layer.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("malformed gossip message: {0}")]
    MalformedMessage(&'static str),

    #[error("invalid sync range: {0}")]
    InvalidRange(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Block tracker errors. Timeouts are routine and drive caller behavior,
/// not process termination.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("requested future block outside of grace range")]
    OutsideGraceRange,

    #[error("timed out waiting for block at height {height}")]
    TimedOut { height: BlockHeight },

    #[error("aborted while waiting for block at height {height}")]
    Aborted { height: BlockHeight },
}

/// Result type alias for convenience
pub type Result<T, E = LatticeError> = std::result::Result<T, E>;

impl From<bincode::Error> for CodecError {
    fn from(err: bincode::Error) -> Self {
        CodecError::Payload(err.to_string())
    }
}
