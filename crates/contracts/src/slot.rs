//! Worker slot identity and lifecycle state

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed position of a worker in the pool, `0..worker_count`
pub type SlotIndex = usize;

/// Incarnation counter of a slot, bumped on every spawn
pub type Generation = u64;

/// Lifecycle state of one slot
///
/// `Spawning -> Running -> Exited -> Spawning -> Running -> ...`
///
/// `Degraded` replaces `Exited` while a slot that keeps failing waits
/// out its restart delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    #[default]
    Spawning,
    Running,
    Exited,
    Degraded,
}

impl SlotState {
    /// Whether the slot currently has a live worker behind it
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    /// Numeric encoding used by the slot state gauge
    pub fn as_gauge(self) -> f64 {
        match self {
            Self::Spawning => 0.0,
            Self::Running => 1.0,
            Self::Exited => 2.0,
            Self::Degraded => 3.0,
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

/// How a worker process terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExitReason {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal, if the process was killed
    pub signal: Option<i32>,
}

impl ExitReason {
    /// Exit reason for a worker that could not be launched or awaited
    pub fn unknown() -> Self {
        Self::default()
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => f.write_str("unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_state_display() {
        assert_eq!(SlotState::Running.to_string(), "running");
        assert_eq!(SlotState::Degraded.to_string(), "degraded");
        assert!(SlotState::Running.is_running());
        assert!(!SlotState::Exited.is_running());
    }

    #[test]
    fn test_exit_reason_display() {
        let by_code = ExitReason {
            code: Some(1),
            signal: None,
        };
        let by_signal = ExitReason {
            code: None,
            signal: Some(9),
        };
        assert_eq!(by_code.to_string(), "exit code 1");
        assert_eq!(by_signal.to_string(), "signal 9");
        assert_eq!(ExitReason::unknown().to_string(), "unknown");
    }
}
