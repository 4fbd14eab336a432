//! Per-worker broadcast fanout
//!
//! Local receivers hang off one tokio broadcast channel per topic. The first
//! local join of a topic subscribes the transport and spawns a relay task
//! that copies every transport payload into that channel.
//!
//! Any transport failure flips the whole worker to local-only delivery. The
//! flag never resets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use contracts::{BroadcastConfig, TransportKind};
use observability::{
    record_broadcast_degraded, record_broadcast_delivered, record_broadcast_published,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, instrument, warn};

use crate::error::FanoutError;
use crate::local::LocalBus;
use crate::redis_bus::RedisBus;
use crate::transport::BroadcastTransport;

/// Transport picked from configuration
#[derive(Debug)]
pub enum ClusterTransport {
    Redis(RedisBus),
    Local(LocalBus),
}

impl ClusterTransport {
    /// Build the configured transport. Nothing connects until first use.
    pub fn from_config(config: &BroadcastConfig) -> Result<Self, FanoutError> {
        match config.transport {
            TransportKind::Redis => Ok(Self::Redis(RedisBus::new(
                &config.redis_url(),
                config.channel_capacity,
            )?)),
            TransportKind::Local => Ok(Self::Local(LocalBus::new(config.channel_capacity))),
        }
    }
}

impl BroadcastTransport for ClusterTransport {
    fn name(&self) -> &str {
        match self {
            Self::Redis(bus) => bus.name(),
            Self::Local(bus) => bus.name(),
        }
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), FanoutError> {
        match self {
            Self::Redis(bus) => bus.publish(topic, payload).await,
            Self::Local(bus) => bus.publish(topic, payload).await,
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Bytes>, FanoutError> {
        match self {
            Self::Redis(bus) => bus.subscribe(topic).await,
            Self::Local(bus) => bus.subscribe(topic).await,
        }
    }
}

impl Fanout<ClusterTransport> {
    /// Fanout over the configured transport.
    ///
    /// A transport that cannot be built leaves the worker local-only from
    /// the start instead of failing it.
    pub fn from_config(config: &BroadcastConfig) -> Self {
        match ClusterTransport::from_config(config) {
            Ok(transport) => Self::new(transport, config.channel_capacity),
            Err(e) => {
                let fanout = Self::new(
                    ClusterTransport::Local(LocalBus::new(config.channel_capacity)),
                    config.channel_capacity,
                );
                fanout.degrade("*", &e.to_string());
                fanout
            }
        }
    }
}

struct Inner<T> {
    transport: T,
    capacity: usize,
    topics: Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
    degraded: Arc<AtomicBool>,
}

/// Broadcast handle of one worker. Cheap to clone.
pub struct Fanout<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Fanout<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Fanout<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fanout")
            .field("capacity", &self.inner.capacity)
            .field("degraded", &self.inner.degraded.load(Ordering::Acquire))
            .finish()
    }
}

impl<T> Fanout<T>
where
    T: BroadcastTransport + Sync + 'static,
{
    /// Wrap `transport`; each topic buffers `capacity` payloads per receiver
    pub fn new(transport: T, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                capacity: capacity.max(1),
                topics: Mutex::new(HashMap::new()),
                degraded: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    /// Transport name
    pub fn transport_name(&self) -> &str {
        self.inner.transport.name()
    }

    /// True once the worker has fallen back to local-only delivery
    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::Acquire)
    }

    /// Topics joined so far
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Receive everything broadcast on `topic` from now on
    pub async fn join(&self, topic: &str) -> broadcast::Receiver<Bytes> {
        let (receiver, local) = {
            let mut topics = self.lock();
            match topics.get(topic) {
                Some(sender) => (sender.subscribe(), None),
                None => {
                    let (sender, receiver) = broadcast::channel(self.inner.capacity);
                    topics.insert(topic.to_string(), sender.clone());
                    (receiver, Some(sender))
                }
            }
        };

        if let Some(local) = local {
            self.attach(topic, local).await;
        }
        receiver
    }

    /// Join every topic in `topics` without keeping a receiver
    #[instrument(skip(self), fields(transport = self.transport_name()))]
    pub async fn attach_topics(&self, topics: &[String]) {
        for topic in topics {
            let _ = self.join(topic).await;
        }
    }

    /// Broadcast `payload` on `topic` to every worker.
    ///
    /// Never fails: when the transport is unusable the payload only reaches
    /// this worker's receivers.
    pub async fn publish(&self, topic: &str, payload: Bytes) {
        if !self.is_degraded() {
            match self.inner.transport.publish(topic, payload.clone()).await {
                Ok(()) => {
                    record_broadcast_published(topic, true);
                    return;
                }
                Err(e) => self.degrade(topic, &e.to_string()),
            }
        }

        record_broadcast_published(topic, false);
        let receivers = self.deliver_local(topic, payload);
        debug!(topic, receivers, "local-only broadcast");
    }

    fn deliver_local(&self, topic: &str, payload: Bytes) -> usize {
        let sender = self.lock().get(topic).cloned();
        let receivers = sender.map_or(0, |sender| sender.send(payload).unwrap_or(0));
        record_broadcast_delivered(topic, receivers);
        receivers
    }

    async fn attach(&self, topic: &str, local: broadcast::Sender<Bytes>) {
        if self.is_degraded() {
            return;
        }

        match self.inner.transport.subscribe(topic).await {
            Ok(upstream) => {
                info!(topic, transport = self.transport_name(), "topic attached");
                tokio::spawn(relay(
                    topic.to_string(),
                    self.transport_name().to_string(),
                    upstream,
                    local,
                    Arc::clone(&self.inner.degraded),
                ));
            }
            Err(e) => self.degrade(topic, &e.to_string()),
        }
    }

    fn degrade(&self, topic: &str, reason: &str) {
        mark_degraded(&self.inner.degraded, topic, self.transport_name(), reason);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Bytes>>> {
        self.inner.topics.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn relay(
    topic: String,
    transport: String,
    mut upstream: mpsc::Receiver<Bytes>,
    local: broadcast::Sender<Bytes>,
    degraded: Arc<AtomicBool>,
) {
    while let Some(payload) = upstream.recv().await {
        // No local receivers right now is fine
        let receivers = local.send(payload).unwrap_or(0);
        record_broadcast_delivered(&topic, receivers);
    }
    mark_degraded(&degraded, &topic, &transport, "subscription ended");
}

fn mark_degraded(flag: &AtomicBool, topic: &str, transport: &str, reason: &str) {
    if !flag.swap(true, Ordering::AcqRel) {
        warn!(topic, transport, reason, "broadcast transport lost, delivering locally only");
        record_broadcast_degraded(topic);
    }
}
