use lattice_common::error::{LatticeError, Result};
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

fn metric_error(err: prometheus::Error) -> LatticeError {
    LatticeError::Internal(err.to_string())
}

/// Sync-loop counters, registered on the injected registry.
pub(crate) struct SyncMetrics {
    state_transitions: IntCounterVec,
    pub committed_blocks: IntCounter,
    pub failed_commits: IntCounter,
    pub availability_broadcasts: IntCounter,
}

impl SyncMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let state_transitions = IntCounterVec::new(
            Opts::new(
                "lattice_block_sync_state_transitions_total",
                "Sync state machine transitions, by entered state",
            ),
            &["state"],
        )
        .map_err(metric_error)?;
        let committed_blocks = IntCounter::new(
            "lattice_block_sync_committed_blocks_total",
            "Blocks committed through sync chunks",
        )
        .map_err(metric_error)?;
        let failed_commits = IntCounter::new(
            "lattice_block_sync_failed_commits_total",
            "Sync chunk blocks that failed validation or commit",
        )
        .map_err(metric_error)?;
        let availability_broadcasts = IntCounter::new(
            "lattice_block_sync_availability_broadcasts_total",
            "Block availability requests broadcast to peers",
        )
        .map_err(metric_error)?;

        registry
            .register(Box::new(state_transitions.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(committed_blocks.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(failed_commits.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(availability_broadcasts.clone()))
            .map_err(metric_error)?;

        Ok(SyncMetrics {
            state_transitions,
            committed_blocks,
            failed_commits,
            availability_broadcasts,
        })
    }

    pub fn record_state(&self, state: &'static str) {
        self.state_transitions.with_label_values(&[state]).inc();
    }
}
