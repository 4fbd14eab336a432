//! Master process: cluster setup, lifecycle tracking and run statistics.

mod orchestrator;
mod stats;

pub use orchestrator::{Master, MasterConfig};
pub use stats::RunStats;
