//! Restart and transfer policies
//!
//! Both default to the plain behavior: immediate respawn, drop on failed
//! transfer. The alternatives are opt-in through configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the supervisor does when a worker exits
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Respawn at once, forever. A crash loop spins without limit.
    #[default]
    Immediate,
    /// Exponential delay after rapid failures, slot marked degraded past a threshold
    Backoff(BackoffConfig),
}

/// Tuning for [`RestartPolicy::Backoff`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first rapid failure (milliseconds)
    pub initial_delay_ms: u64,
    /// Upper bound for the delay (milliseconds)
    pub max_delay_ms: u64,
    /// Growth factor per consecutive rapid failure
    pub multiplier: f64,
    /// Consecutive rapid failures before the slot is marked degraded
    pub failure_threshold: u32,
    /// An exit this soon after spawn counts as a rapid failure (milliseconds)
    pub failure_window_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            failure_threshold: 5,
            failure_window_ms: 10_000,
        }
    }
}

impl BackoffConfig {
    /// Failure window as a duration
    pub fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }

    /// Delay before respawn after `consecutive` rapid failures
    ///
    /// Zero failures means the worker ran long enough: no delay.
    pub fn delay_for(&self, consecutive: u32) -> Duration {
        if consecutive == 0 {
            return Duration::ZERO;
        }
        let exponent = (consecutive - 1).min(63) as i32;
        let scaled = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// What the dispatcher does when a connection cannot be handed to its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPolicy {
    /// Close the connection; the client sees a reset
    #[default]
    Drop,
    /// Keep one connection per slot until the slot is respawned
    HoldOne,
}
