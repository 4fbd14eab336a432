//! Dispatch counters for the run summary

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters for the connection dispatcher
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Connections accepted and routed to a slot
    routed: AtomicU64,
    /// Connections handed to a worker
    transferred: AtomicU64,
    /// Transfer attempts that failed
    failed: AtomicU64,
    /// Connections closed without reaching a worker
    dropped: AtomicU64,
    /// Connections currently parked under `hold_one`
    held: AtomicUsize,
    /// Parked connections later handed to a respawned worker
    released: AtomicU64,
}

impl DispatchMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn routed(&self) -> u64 {
        self.routed.load(Ordering::Relaxed)
    }

    pub fn inc_routed(&self) {
        self.routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub fn inc_transferred(&self) {
        self.transferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Connections parked right now
    pub fn held(&self) -> usize {
        self.held.load(Ordering::Relaxed)
    }

    pub fn set_held(&self, held: usize) {
        self.held.store(held, Ordering::Relaxed);
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    pub fn inc_released(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            routed: self.routed(),
            transferred: self.transferred(),
            failed: self.failed(),
            dropped: self.dropped(),
            held: self.held(),
            released: self.released(),
        }
    }
}

/// Snapshot of dispatch metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub routed: u64,
    pub transferred: u64,
    pub failed: u64,
    pub dropped: u64,
    pub held: usize,
    pub released: u64,
}

impl std::fmt::Display for DispatchSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Dispatch Summary ===")?;
        writeln!(f, "Routed: {}", self.routed)?;
        writeln!(f, "Transferred: {}", self.transferred)?;
        writeln!(f, "Transfer failures: {}", self.failed)?;
        writeln!(f, "Dropped: {}", self.dropped)?;
        writeln!(f, "Held / released: {} / {}", self.held, self.released)
    }
}
