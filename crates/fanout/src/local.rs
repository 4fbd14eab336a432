//! In-process broadcast bus
//!
//! Every `LocalBus` clone shares the same topics. Good for tests and for a
//! single process; separate processes each get their own bus, so there is no
//! cross-worker delivery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::error::FanoutError;
use crate::transport::BroadcastTransport;

/// In-process pub/sub on tokio broadcast channels
#[derive(Debug, Clone)]
pub struct LocalBus {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<Bytes>>>>,
    capacity: usize,
}

impl LocalBus {
    /// Create a bus whose per-topic queues hold `capacity` payloads
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// End every current subscription to `topic`
    pub fn close_topic(&self, topic: &str) {
        self.lock().remove(topic);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Bytes>>> {
        self.topics.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Bytes> {
        self.lock()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl BroadcastTransport for LocalBus {
    fn name(&self) -> &str {
        "local"
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), FanoutError> {
        // No subscribers is not an error
        let receivers = self.sender(topic).send(payload).unwrap_or(0);
        debug!(topic, receivers, "local bus publish");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Bytes>, FanoutError> {
        let mut source = self.sender(topic).subscribe();
        let (tx, rx) = mpsc::channel(self.capacity);
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(topic = %topic, skipped, "local bus subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(topic = %topic, "local bus subscription ended");
        });

        Ok(rx)
    }
}
