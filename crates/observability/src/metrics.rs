//! Cluster metrics
//!
//! Prometheus-facing recorders for routing, supervision and broadcast, plus an
//! in-memory aggregator for the end-of-run worker lifecycle summary.

use std::collections::BTreeMap;

use contracts::{SlotIndex, SlotState};
use metrics::{counter, gauge, histogram};

/// Record a connection routed to a slot
pub fn record_connection_routed(slot: SlotIndex) {
    counter!(
        "sticky_cluster_connections_routed_total",
        "slot" => slot.to_string()
    )
    .increment(1);
}

/// Record a failed transfer
///
/// `reason` is a short static label: `closed`, `would_block`, `no_worker`, ...
pub fn record_transfer_failed(slot: SlotIndex, reason: &'static str) {
    counter!(
        "sticky_cluster_transfer_failures_total",
        "slot" => slot.to_string(),
        "reason" => reason
    )
    .increment(1);
}

/// Record a connection parked (`hold_one`) or released
pub fn record_connection_held(slot: SlotIndex, held: bool) {
    gauge!(
        "sticky_cluster_held_connections",
        "slot" => slot.to_string()
    )
    .set(if held { 1.0 } else { 0.0 });
}

/// Record a worker spawn
pub fn record_worker_spawned(slot: SlotIndex) {
    counter!(
        "sticky_cluster_worker_spawns_total",
        "slot" => slot.to_string()
    )
    .increment(1);
}

/// Record a worker exit and how long that incarnation lived
pub fn record_worker_exited(slot: SlotIndex, lifetime_secs: f64) {
    counter!(
        "sticky_cluster_worker_exits_total",
        "slot" => slot.to_string()
    )
    .increment(1);
    histogram!("sticky_cluster_worker_lifetime_seconds").record(lifetime_secs);
}

/// Record the current state of a slot
pub fn record_slot_state(slot: SlotIndex, state: SlotState) {
    gauge!(
        "sticky_cluster_slot_state",
        "slot" => slot.to_string()
    )
    .set(state.as_gauge());
}

/// Record a broadcast publish
pub fn record_broadcast_published(topic: &str, via_transport: bool) {
    let path = if via_transport { "transport" } else { "local" };
    counter!(
        "sticky_cluster_broadcast_published_total",
        "topic" => topic.to_string(),
        "path" => path
    )
    .increment(1);
}

/// Record a payload delivered to local receivers
pub fn record_broadcast_delivered(topic: &str, receivers: usize) {
    counter!(
        "sticky_cluster_broadcast_delivered_total",
        "topic" => topic.to_string()
    )
    .increment(receivers as u64);
}

/// Record a topic falling back to local-only delivery
pub fn record_broadcast_degraded(topic: &str) {
    counter!(
        "sticky_cluster_broadcast_degraded_total",
        "topic" => topic.to_string()
    )
    .increment(1);
}

/// Worker lifecycle aggregator
///
/// Fed by the master as supervisor events arrive; produces the run summary.
#[derive(Debug, Clone, Default)]
pub struct LifecycleAggregator {
    /// Total spawns, initial ones included
    pub total_spawns: u64,

    /// Total exits
    pub total_exits: u64,

    /// Exits with a non-zero code or a signal
    pub abnormal_exits: u64,

    /// Launch attempts that failed before a process existed
    pub launch_failures: u64,

    /// Times any slot entered the degraded state
    pub degradations: u64,

    /// Worker lifetime statistics (seconds)
    pub lifetime_stats: RunningStats,

    /// Restarts per slot (spawns after the first)
    pub restarts: BTreeMap<SlotIndex, u64>,
}

impl LifecycleAggregator {
    /// Create an empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a spawn; generation 1 is the initial spawn
    pub fn on_spawn(&mut self, slot: SlotIndex, generation: u64) {
        self.total_spawns += 1;
        if generation > 1 {
            *self.restarts.entry(slot).or_insert(0) += 1;
        }
    }

    /// Count an exit
    pub fn on_exit(&mut self, lifetime_secs: f64, abnormal: bool) {
        self.total_exits += 1;
        if abnormal {
            self.abnormal_exits += 1;
        }
        self.lifetime_stats.push(lifetime_secs);
    }

    /// Count a failed launch
    pub fn on_launch_failure(&mut self) {
        self.launch_failures += 1;
    }

    /// Count a slot entering the degraded state
    pub fn on_degraded(&mut self) {
        self.degradations += 1;
    }

    /// Build the summary
    pub fn summary(&self) -> LifecycleSummary {
        LifecycleSummary {
            total_spawns: self.total_spawns,
            total_exits: self.total_exits,
            abnormal_exits: self.abnormal_exits,
            launch_failures: self.launch_failures,
            degradations: self.degradations,
            lifetime_secs: StatsSummary::from(&self.lifetime_stats),
            restarts: self.restarts.clone(),
        }
    }
}

/// Worker lifecycle summary
#[derive(Debug, Clone, Default)]
pub struct LifecycleSummary {
    pub total_spawns: u64,
    pub total_exits: u64,
    pub abnormal_exits: u64,
    pub launch_failures: u64,
    pub degradations: u64,
    pub lifetime_secs: StatsSummary,
    pub restarts: BTreeMap<SlotIndex, u64>,
}

impl std::fmt::Display for LifecycleSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Worker Lifecycle Summary ===")?;
        writeln!(f, "Spawns: {}", self.total_spawns)?;
        writeln!(
            f,
            "Exits: {} ({} abnormal)",
            self.total_exits, self.abnormal_exits
        )?;
        writeln!(f, "Launch failures: {}", self.launch_failures)?;
        writeln!(f, "Degradations: {}", self.degradations)?;
        writeln!(f, "Worker lifetime (s): {}", self.lifetime_secs)?;

        if !self.restarts.is_empty() {
            writeln!(f, "Restarts per slot:")?;
            for (slot, count) in &self.restarts {
                writeln!(f, "  slot {}: {}", slot, count)?;
            }
        }

        Ok(())
    }
}

/// Statistics summary
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online statistics (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// Add a sample
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// Sample count
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// Standard deviation
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Minimum
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Maximum
    pub fn max(&self) -> f64 {
        self.max
    }
}
