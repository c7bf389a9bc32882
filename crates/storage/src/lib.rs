//! Durable block persistence: an append-only, checksummed blocks file with
//! an in-memory height index and a height-gated wakeup tracker.

mod block_store;
mod codec;
mod config;
mod index;
mod tracker;

pub use block_store::BlockStore;
pub use codec::BlockCodec;
pub use config::BlockStorageConfig;
pub use tracker::BlockTracker;
