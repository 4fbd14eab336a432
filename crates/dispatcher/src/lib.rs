//! # Dispatcher
//!
//! Master-side connection routing.
//!
//! Responsibilities:
//! - Own the public listening port
//! - Pick a worker slot for every raw connection from its source address
//! - Hand the untouched connection to that worker over its control channel
//! - Run the master loop ([`Cluster`]) that ties accept and supervision together

pub mod cluster;
pub mod dispatcher;
pub mod error;
pub mod metrics;

pub use cluster::{Cluster, ClusterBuilder, ClusterHandle, ClusterReport};
pub use dispatcher::{DispatchOutcome, Dispatcher, TransferFailure};
pub use error::DispatcherError;
pub use metrics::{DispatchMetrics, DispatchSnapshot};
