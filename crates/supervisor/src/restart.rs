//! Restart decisions

use std::time::Duration;

use contracts::RestartPolicy;

/// Minimum retry delay after a failed launch.
///
/// A launch failure leaves no process to reap, so retrying with no delay
/// would spin the master loop.
pub const LAUNCH_RETRY_DELAY: Duration = Duration::from_secs(1);

/// What to do after a worker exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartDecision {
    /// Wait this long before respawning
    pub delay: Duration,
    /// Set when the slot crossed the failure threshold
    pub degraded: Option<u32>,
}

/// Per-slot rapid-failure bookkeeping
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureTracker {
    consecutive: u32,
}

impl FailureTracker {
    /// Consecutive rapid failures so far
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Decide the respawn for an exit after `lifetime`.
    ///
    /// `launch_failed` marks an attempt that never produced a process.
    pub fn on_exit(
        &mut self,
        policy: &RestartPolicy,
        lifetime: Duration,
        launch_failed: bool,
    ) -> RestartDecision {
        match policy {
            RestartPolicy::Immediate => RestartDecision {
                delay: if launch_failed {
                    LAUNCH_RETRY_DELAY
                } else {
                    Duration::ZERO
                },
                degraded: None,
            },
            RestartPolicy::Backoff(cfg) => {
                if launch_failed || lifetime < cfg.failure_window() {
                    self.consecutive = self.consecutive.saturating_add(1);
                } else {
                    self.consecutive = 0;
                }

                let degraded = (self.consecutive >= cfg.failure_threshold && self.consecutive > 0)
                    .then_some(self.consecutive);

                let mut delay = cfg.delay_for(self.consecutive);
                if launch_failed && delay.is_zero() {
                    delay = LAUNCH_RETRY_DELAY;
                }

                RestartDecision { delay, degraded }
            }
        }
    }
}
