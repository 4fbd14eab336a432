//! Application trait - what a worker runs on each connection

use bytes::Bytes;
use contracts::SlotIndex;
use fanout::{ClusterTransport, Fanout};

use crate::server::Incoming;

/// Broadcast handle type used by workers
pub type WorkerFanout = Fanout<ClusterTransport>;

/// Per-worker state handed to every connection
#[derive(Debug, Clone)]
pub struct AppContext {
    pub slot: SlotIndex,
    pub fanout: WorkerFanout,
}

/// Application protocol served by a worker
///
/// The runtime spawns one `serve` task per connection, native or forwarded.
/// The connection closes when `serve` returns.
#[trait_variant::make(Application: Send)]
pub trait LocalApplication {
    /// Application name (used for logging)
    fn name(&self) -> &str;

    /// Serve one client connection to completion
    async fn serve(&self, incoming: Incoming, context: AppContext);

    /// Handle an application message sent by the master
    async fn on_control(&self, message: Bytes);
}
