//! Run statistics.

use std::time::Duration;

use dispatcher::DispatchSnapshot;
use observability::LifecycleSummary;

/// Statistics from one master run
#[derive(Debug, Clone)]
pub struct RunStats {
    /// Wall time from first spawn to last reap
    pub duration: Duration,

    /// Connection routing counters
    pub dispatch: DispatchSnapshot,

    /// Held connections closed at shutdown
    pub held_dropped: usize,

    /// Worker spawns, exits and restarts
    pub lifecycle: LifecycleSummary,
}

impl RunStats {
    /// Routed connections per second over the run
    pub fn connection_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.dispatch.routed as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Share of routed connections that were dropped, in percent
    pub fn drop_rate(&self) -> f64 {
        if self.dispatch.routed > 0 {
            (self.dispatch.dropped as f64 / self.dispatch.routed as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Cluster Run Statistics ===\n");
        println!("Duration: {:.2}s", self.duration.as_secs_f64());
        println!("Connections/s: {:.2}", self.connection_rate());
        println!("Drop rate: {:.2}%", self.drop_rate());
        if self.held_dropped > 0 {
            println!("Held connections closed at shutdown: {}", self.held_dropped);
        }
        println!();
        print!("{}", self.dispatch);
        println!();
        print!("{}", self.lifecycle);
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(routed: u64, dropped: u64, secs: u64) -> RunStats {
        RunStats {
            duration: Duration::from_secs(secs),
            dispatch: DispatchSnapshot {
                routed,
                transferred: routed - dropped,
                failed: dropped,
                dropped,
                held: 0,
                released: 0,
            },
            held_dropped: 0,
            lifecycle: LifecycleSummary::default(),
        }
    }

    #[test]
    fn test_rates() {
        let s = stats(100, 25, 10);
        assert!((s.connection_rate() - 10.0).abs() < 1e-9);
        assert!((s.drop_rate() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_rates_empty_run() {
        let s = stats(0, 0, 0);
        assert_eq!(s.connection_rate(), 0.0);
        assert_eq!(s.drop_rate(), 0.0);
    }
}
