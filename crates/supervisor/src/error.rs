//! Supervisor error types

use contracts::SlotIndex;
use control_channel::ControlError;
use thiserror::Error;

/// Supervisor errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Worker process could not be started
    #[error("failed to launch worker for slot {slot}: {source}")]
    Launch {
        slot: SlotIndex,
        #[source]
        source: std::io::Error,
    },

    /// Control channel setup or send failed
    #[error("control channel error: {0}")]
    Control(#[from] ControlError),

    /// Slot index outside the pool
    #[error("unknown slot {0}")]
    UnknownSlot(SlotIndex),

    /// Slot has no live worker
    #[error("slot {0} has no running worker")]
    NotRunning(SlotIndex),

    /// `start` called twice
    #[error("supervisor already started")]
    AlreadyStarted,
}

impl SupervisorError {
    /// Create a launch error
    pub fn launch(slot: SlotIndex, source: std::io::Error) -> Self {
        Self::Launch { slot, source }
    }
}
