//! # Fanout
//!
//! Cross-worker broadcast.
//!
//! A message published on a topic by any worker reaches the local receivers
//! of every worker joined to that topic, the publisher included. The shared
//! piece is a [`BroadcastTransport`] (Redis pub/sub in production, an
//! in-process bus in tests). When the transport fails the worker degrades to
//! local-only delivery and reports it through [`Fanout::is_degraded`].

pub mod error;
pub mod fanout;
pub mod local;
pub mod redis_bus;
pub mod transport;

pub use error::FanoutError;
pub use fanout::{ClusterTransport, Fanout};
pub use local::LocalBus;
pub use redis_bus::RedisBus;
pub use transport::BroadcastTransport;

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use contracts::{BroadcastConfig, TransportKind};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    /// Transport that rejects everything
    struct DownTransport;

    impl BroadcastTransport for DownTransport {
        fn name(&self) -> &str {
            "down"
        }

        async fn publish(&self, _topic: &str, _payload: Bytes) -> Result<(), FanoutError> {
            Err(FanoutError::transport("down", "connection refused"))
        }

        async fn subscribe(&self, _topic: &str) -> Result<mpsc::Receiver<Bytes>, FanoutError> {
            Err(FanoutError::Closed)
        }
    }

    /// Transport that subscribes fine but fails to publish
    struct PublishFails(LocalBus);

    impl BroadcastTransport for PublishFails {
        fn name(&self) -> &str {
            "publish-fails"
        }

        async fn publish(&self, _topic: &str, _payload: Bytes) -> Result<(), FanoutError> {
            Err(FanoutError::transport("publish-fails", "broken pipe"))
        }

        async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Bytes>, FanoutError> {
            self.0.subscribe(topic).await
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_worker_including_publisher() {
        let bus = LocalBus::new(16);
        let worker_a = Fanout::new(bus.clone(), 16);
        let worker_b = Fanout::new(bus.clone(), 16);

        let mut rx_a = worker_a.join("chat message").await;
        let mut rx_b = worker_b.join("chat message").await;

        worker_a
            .publish("chat message", Bytes::from_static(b"hello"))
            .await;

        let got_a = timeout(WAIT, rx_a.recv()).await.unwrap().unwrap();
        let got_b = timeout(WAIT, rx_b.recv()).await.unwrap().unwrap();
        assert_eq!(got_a, Bytes::from_static(b"hello"));
        assert_eq!(got_b, Bytes::from_static(b"hello"));
        assert!(!worker_a.is_degraded());
        assert!(!worker_b.is_degraded());
    }

    #[tokio::test]
    async fn test_unjoined_worker_receives_nothing() {
        let bus = LocalBus::new(16);
        let worker_a = Fanout::new(bus.clone(), 16);
        let worker_b = Fanout::new(bus.clone(), 16);

        let mut rx_b = worker_b.join("other").await;
        worker_a.publish("chat message", Bytes::from_static(b"x")).await;
        worker_b.publish("other", Bytes::from_static(b"y")).await;

        let got = timeout(WAIT, rx_b.recv()).await.unwrap().unwrap();
        assert_eq!(got, Bytes::from_static(b"y"));
    }

    #[tokio::test]
    async fn test_subscribe_failure_degrades_to_local() {
        let fanout = Fanout::new(DownTransport, 16);
        let mut rx = fanout.join("t").await;
        assert!(fanout.is_degraded());

        fanout.publish("t", Bytes::from_static(b"local")).await;
        let got = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(got, Bytes::from_static(b"local"));
    }

    #[tokio::test]
    async fn test_publish_failure_degrades_to_local() {
        let fanout = Fanout::new(PublishFails(LocalBus::new(16)), 16);
        let mut rx = fanout.join("t").await;
        assert!(!fanout.is_degraded());

        fanout.publish("t", Bytes::from_static(b"first")).await;
        assert!(fanout.is_degraded());
        let got = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(got, Bytes::from_static(b"first"));

        // Stays local afterwards
        fanout.publish("t", Bytes::from_static(b"second")).await;
        let got = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(got, Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn test_lost_subscription_degrades() {
        let bus = LocalBus::new(16);
        let fanout = Fanout::new(bus.clone(), 16);
        let mut rx = fanout.join("t").await;

        bus.close_topic("t");
        timeout(WAIT, async {
            while !fanout.is_degraded() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        fanout.publish("t", Bytes::from_static(b"after")).await;
        let got = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(got, Bytes::from_static(b"after"));
    }

    #[tokio::test]
    async fn test_second_join_shares_topic() {
        let fanout = Fanout::new(LocalBus::new(16), 16);
        let mut first = fanout.join("t").await;
        let mut second = fanout.join("t").await;
        assert_eq!(fanout.topics(), vec!["t".to_string()]);

        fanout.publish("t", Bytes::from_static(b"both")).await;
        assert_eq!(
            timeout(WAIT, first.recv()).await.unwrap().unwrap(),
            Bytes::from_static(b"both")
        );
        assert_eq!(
            timeout(WAIT, second.recv()).await.unwrap().unwrap(),
            Bytes::from_static(b"both")
        );
    }

    #[tokio::test]
    async fn test_attach_topics_and_transport_from_config() {
        let config = BroadcastConfig {
            transport: TransportKind::Local,
            topics: vec!["a".into(), "b".into()],
            ..BroadcastConfig::default()
        };
        let transport = ClusterTransport::from_config(&config).unwrap();
        assert_eq!(transport.name(), "local");

        let fanout = Fanout::new(transport, config.channel_capacity);
        fanout.attach_topics(&config.topics).await;
        assert_eq!(fanout.topics(), vec!["a".to_string(), "b".to_string()]);
        assert!(!fanout.is_degraded());
    }

    #[tokio::test]
    async fn test_unbuildable_transport_starts_local_only() {
        let config = BroadcastConfig {
            host: "not a host".into(),
            ..BroadcastConfig::default()
        };
        assert!(ClusterTransport::from_config(&config).is_err());

        let fanout = Fanout::from_config(&config);
        assert!(fanout.is_degraded());

        let mut rx = fanout.join("chat message").await;
        fanout
            .publish("chat message", Bytes::from_static(b"still here"))
            .await;
        let got = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(got, Bytes::from_static(b"still here"));
    }

    #[test]
    fn test_ipv6_redis_host_builds() {
        let config = BroadcastConfig {
            host: "::1".into(),
            ..BroadcastConfig::default()
        };
        let transport = ClusterTransport::from_config(&config).unwrap();
        assert_eq!(transport.name(), "redis");
        assert!(!Fanout::from_config(&config).is_degraded());
    }

    #[test]
    fn test_redis_transport_from_config() {
        let config = BroadcastConfig::default();
        let transport = ClusterTransport::from_config(&config).unwrap();
        assert_eq!(transport.name(), "redis");
    }
}
