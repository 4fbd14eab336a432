//! Redis pub/sub transport
//!
//! `PUBLISH` goes over one shared multiplexed connection. Each subscribed
//! topic gets its own pub/sub connection, relayed into a channel by a
//! background task.

use bytes::Bytes;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, info, warn};

use crate::error::FanoutError;
use crate::transport::BroadcastTransport;

/// Redis-backed broadcast transport
pub struct RedisBus {
    client: redis::Client,
    url: String,
    publisher: OnceCell<MultiplexedConnection>,
    capacity: usize,
}

impl RedisBus {
    /// Create a transport for `redis_url`; no connection is made yet
    pub fn new(redis_url: &str, capacity: usize) -> Result<Self, FanoutError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            url: redis_url.to_string(),
            publisher: OnceCell::new(),
            capacity: capacity.max(1),
        })
    }

    /// Server URL
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn publisher(&self) -> Result<MultiplexedConnection, FanoutError> {
        let conn = self
            .publisher
            .get_or_try_init(|| async {
                let conn = self.client.get_multiplexed_async_connection().await?;
                info!(url = %self.url, "redis publisher connected");
                Ok::<_, FanoutError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }
}

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus")
            .field("url", &self.url)
            .field("connected", &self.publisher.initialized())
            .finish()
    }
}

impl BroadcastTransport for RedisBus {
    fn name(&self) -> &str {
        "redis"
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), FanoutError> {
        let mut conn = self.publisher().await?;
        let receivers: i64 = conn.publish(topic, payload.as_ref()).await?;
        debug!(topic, receivers, "redis publish");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Bytes>, FanoutError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;
        info!(topic, url = %self.url, "redis subscription established");

        let (tx, rx) = mpsc::channel(self.capacity);
        let topic = topic.to_string();
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload = Bytes::copy_from_slice(msg.get_payload_bytes());
                if tx.send(payload).await.is_err() {
                    debug!(topic = %topic, "redis subscriber dropped");
                    return;
                }
            }
            warn!(topic = %topic, "redis subscription stream ended");
        });

        Ok(rx)
    }
}
