pub mod error;
pub mod test_kit;
pub mod types;

pub use error::{CodecError, LatticeError, Result, StorageError, SyncError, TrackerError};
pub use types::{BlockHeight, BlockPair, NodeAddress, Sha256, TimestampNano};
