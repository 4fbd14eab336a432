//! Slot table
//!
//! One entry per worker slot. Only the supervisor mutates it; the dispatcher
//! reads it through [`SlotLookup`].

use std::time::Instant;

use contracts::{Generation, SlotIndex, SlotState};
use control_channel::ControlSender;
use tokio::sync::oneshot;

use crate::restart::FailureTracker;

/// Read-only view of the slot table
pub trait SlotLookup {
    /// Number of slots
    fn slot_count(&self) -> usize;

    /// Control channel of a running slot, if it has a usable one
    fn control(&self, slot: SlotIndex) -> Option<&ControlSender>;

    /// Current state of a slot
    fn state(&self, slot: SlotIndex) -> Option<SlotState>;
}

/// Point-in-time view of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub slot: SlotIndex,
    pub state: SlotState,
    pub generation: Generation,
    pub pid: Option<u32>,
}

#[derive(Debug, Default)]
pub(crate) struct SlotEntry {
    pub(crate) state: SlotState,
    pub(crate) generation: Generation,
    pub(crate) pid: Option<u32>,
    pub(crate) control: Option<ControlSender>,
    pub(crate) kill: Option<oneshot::Sender<()>>,
    pub(crate) started_at: Option<Instant>,
    pub(crate) failures: FailureTracker,
}

impl SlotEntry {
    /// A process exists for the current generation and has not been reaped.
    /// Stays true after a kill request until the exit is handled.
    pub(crate) fn is_alive(&self) -> bool {
        self.started_at.is_some() && self.state.is_running()
    }

    /// Clear everything tied to the exited incarnation
    pub(crate) fn clear_process(&mut self) {
        self.pid = None;
        self.control = None;
        self.kill = None;
    }
}

/// Worker slots, indexed `0..slot_count`
#[derive(Debug, Default)]
pub struct SlotTable {
    entries: Vec<SlotEntry>,
}

impl SlotTable {
    pub(crate) fn new(slot_count: usize) -> Self {
        Self {
            entries: (0..slot_count).map(|_| SlotEntry::default()).collect(),
        }
    }

    pub(crate) fn get_mut(&mut self, slot: SlotIndex) -> Option<&mut SlotEntry> {
        self.entries.get_mut(slot)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (SlotIndex, &SlotEntry)> {
        self.entries.iter().enumerate()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (SlotIndex, &mut SlotEntry)> {
        self.entries.iter_mut().enumerate()
    }

    /// Snapshot of one slot
    pub fn snapshot(&self, slot: SlotIndex) -> Option<SlotSnapshot> {
        self.entries.get(slot).map(|entry| SlotSnapshot {
            slot,
            state: entry.state,
            generation: entry.generation,
            pid: entry.pid,
        })
    }

    /// Snapshots of every slot
    pub fn snapshots(&self) -> Vec<SlotSnapshot> {
        (0..self.entries.len())
            .filter_map(|slot| self.snapshot(slot))
            .collect()
    }

    /// Number of slots with a live, unreaped process
    pub fn alive_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_alive()).count()
    }
}

impl SlotLookup for SlotTable {
    fn slot_count(&self) -> usize {
        self.entries.len()
    }

    fn control(&self, slot: SlotIndex) -> Option<&ControlSender> {
        let entry = self.entries.get(slot)?;
        if !entry.state.is_running() {
            return None;
        }
        entry.control.as_ref().filter(|c| !c.is_broken())
    }

    fn state(&self, slot: SlotIndex) -> Option<SlotState> {
        self.entries.get(slot).map(|e| e.state)
    }
}
