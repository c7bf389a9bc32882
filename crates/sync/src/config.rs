use lattice_common::types::NodeAddress;
use serde::Deserialize;
use std::time::Duration;

/// Block sync configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// This node's gossip identity, stamped on every outgoing message.
    pub node_address: NodeAddress,

    /// Maximum number of blocks requested (and served) per sync round.
    pub batch_size: u32,

    /// How long the node may go without a local commit before starting a
    /// sync round.
    pub no_commit_interval: Duration,

    /// Window for accumulating peer availability responses.
    pub collect_response_timeout: Duration,

    /// How long to wait for the chosen source to deliver a chunk.
    pub collect_chunks_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            node_address: NodeAddress::default(),
            batch_size: 10,
            no_commit_interval: Duration::from_secs(8),
            collect_response_timeout: Duration::from_secs(1),
            collect_chunks_timeout: Duration::from_secs(20),
        }
    }
}
