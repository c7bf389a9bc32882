use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Block persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockStorageConfig {
    /// Directory holding the blocks file; created when absent.
    pub data_dir: PathBuf,

    /// Hard ceiling on a single encoded block record, in bytes.
    pub max_block_size_bytes: usize,

    pub network_id: u32,
    pub virtual_chain_id: u32,

    /// How far beyond the committed height a `wait_for_block` caller may
    /// target before being rejected outright.
    pub tracker_grace_distance: u64,

    /// Hard timeout for `wait_for_block`.
    pub tracker_grace_timeout: Duration,
}

impl Default for BlockStorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/blocks"),
            max_block_size_bytes: 64 * 1024 * 1024,
            network_id: 0,
            virtual_chain_id: 42,
            tracker_grace_distance: 5,
            tracker_grace_timeout: Duration::from_secs(30),
        }
    }
}
