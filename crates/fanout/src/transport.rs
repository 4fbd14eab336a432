//! BroadcastTransport trait - cross-process pub/sub interface

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::FanoutError;

/// Pub/sub capability shared by every process of the cluster
///
/// Delivery is at-least-once with no ordering across publishers; a
/// publisher also receives its own messages if it is subscribed.
#[trait_variant::make(BroadcastTransport: Send)]
pub trait LocalBroadcastTransport {
    /// Transport name (used for logging)
    fn name(&self) -> &str;

    /// Publish `payload` on `topic`
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), FanoutError>;

    /// Subscribe to `topic`.
    ///
    /// The receiver yields every payload published after the call; it ends
    /// when the subscription is lost.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Bytes>, FanoutError>;
}
