//! Height-gated wakeup primitive: producers advance a monotonic counter,
//! consumers block until a target height is reached or a timeout/grace
//! violation occurs.
//!
//! Built on a watch channel, which is the generation-latch pattern: every
//! increment publishes a new version, so there is no missed-wakeup window
//! between checking the height and starting to wait.

use lattice_common::error::TrackerError;
use lattice_common::types::BlockHeight;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

#[derive(Debug)]
pub struct BlockTracker {
    height: watch::Sender<BlockHeight>,
    grace_distance: BlockHeight,
    timeout: Duration,
}

impl BlockTracker {
    pub fn new(start_height: BlockHeight, grace_distance: BlockHeight, timeout: Duration) -> Self {
        let (height, _) = watch::channel(start_height);
        BlockTracker {
            height,
            grace_distance,
            timeout,
        }
    }

    pub fn current_height(&self) -> BlockHeight {
        *self.height.borrow()
    }

    /// Advances the counter by one and wakes every waiter so it can recheck
    /// its target.
    pub fn increment_height(&self) {
        self.height.send_modify(|h| *h += 1);
    }

    /// Blocks until the tracked height reaches `target`.
    ///
    /// Returns immediately when the height was already reached, fails
    /// immediately when `target` lies beyond the grace distance, and fails
    /// with [`TrackerError::TimedOut`] when the configured timeout elapses
    /// first. A waiter for height N is not released while the counter sits
    /// at N-1, even across burst advances.
    pub async fn wait_for_block(&self, target: BlockHeight) -> Result<(), TrackerError> {
        let mut rx = self.height.subscribe();
        let current = *rx.borrow();
        if current >= target {
            return Ok(());
        }
        if target > current.saturating_add(self.grace_distance) {
            return Err(TrackerError::OutsideGraceRange);
        }

        debug!(target, current, "waiting for block");
        let deadline = Instant::now() + self.timeout;
        loop {
            match timeout_at(deadline, rx.changed()).await {
                Err(_) => return Err(TrackerError::TimedOut { height: target }),
                Ok(Err(_)) => return Err(TrackerError::Aborted { height: target }),
                Ok(Ok(())) => {
                    if *rx.borrow_and_update() >= target {
                        return Ok(());
                    }
                }
            }
        }
    }
}
