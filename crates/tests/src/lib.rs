//! # Integration Tests
//!
//! End-to-end tests across crates.
//!
//! Covers:
//! - Configuration round-trip into a running cluster
//! - Dispatcher -> worker -> fanout with in-process workers
//! - Sticky reconnects across a worker respawn

pub mod harness;

pub use harness::InProcessLauncher;

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};

    #[test]
    fn test_blueprint_survives_worker_handoff() {
        // The master hands the resolved blueprint to workers as JSON
        let toml = r#"
            [server]
            port = 4500

            [workers]
            count = 3

            [supervisor.restart]
            policy = "backoff"
            failure_threshold = 2

            [dispatcher]
            transfer_policy = "hold_one"

            [broadcast]
            transport = "local"
            topics = ["chat message", "presence"]
        "#;
        let blueprint = ConfigLoader::load_from_str(toml, ConfigFormat::Toml).unwrap();
        let json = ConfigLoader::to_json(&blueprint).unwrap();
        let restored = ConfigLoader::load_from_str(&json, ConfigFormat::Json).unwrap();

        assert_eq!(restored.server.port, 4500);
        assert_eq!(restored.worker_count(), 3);
        assert_eq!(restored.supervisor.restart, blueprint.supervisor.restart);
        assert_eq!(
            restored.dispatcher.transfer_policy,
            contracts::TransferPolicy::HoldOne
        );
        assert_eq!(restored.broadcast.topics, blueprint.broadcast.topics);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;

    use dispatcher::{Cluster, ClusterBuilder};
    use fanout::LocalBus;
    use supervisor::SupervisorEvent;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpSocket, TcpStream};
    use tokio::sync::{broadcast, oneshot};
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    use crate::InProcessLauncher;

    const WAIT: Duration = Duration::from_secs(10);

    struct Running {
        addr: SocketAddr,
        handle: dispatcher::ClusterHandle,
        events: broadcast::Receiver<SupervisorEvent>,
        stop: oneshot::Sender<()>,
        run: JoinHandle<Result<dispatcher::ClusterReport, dispatcher::DispatcherError>>,
    }

    async fn start(workers: usize) -> Running {
        let cluster: Cluster<InProcessLauncher> =
            ClusterBuilder::new(InProcessLauncher::new(LocalBus::new(64)))
                .workers(workers)
                .shutdown_grace(Duration::from_secs(2))
                .bind()
                .await
                .unwrap();
        let addr = cluster.local_addr().unwrap();
        let handle = cluster.handle();
        let events = cluster.subscribe();
        let (stop, stop_rx) = oneshot::channel::<()>();
        let run = tokio::spawn(cluster.run_until(async {
            let _ = stop_rx.await;
        }));
        Running {
            addr,
            handle,
            events,
            stop,
            run,
        }
    }

    /// Connect from a specific loopback source address
    async fn connect_from(source: Ipv4Addr, addr: SocketAddr) -> BufReader<TcpStream> {
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind(SocketAddr::new(IpAddr::V4(source), 0)).unwrap();
        BufReader::new(socket.connect(addr).await.unwrap())
    }

    async fn read_line(client: &mut BufReader<TcpStream>) -> String {
        let mut line = String::new();
        timeout(WAIT, client.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        line
    }

    fn greeting(slot: usize) -> String {
        format!("* connected to worker {slot}\n")
    }

    #[tokio::test]
    async fn test_client_lands_on_its_routed_slot() {
        let cluster = start(3).await;
        let source = Ipv4Addr::LOCALHOST;
        let expected = router::route_ip(IpAddr::V4(source), 3);

        let mut client = connect_from(source, cluster.addr).await;
        assert_eq!(read_line(&mut client).await, greeting(expected));

        cluster.stop.send(()).unwrap();
        let report = cluster.run.await.unwrap().unwrap();
        assert_eq!(report.dispatch.routed, 1);
        assert_eq!(report.dispatch.transferred, 1);
        assert_eq!(report.dispatch.dropped, 0);
    }

    #[tokio::test]
    async fn test_chat_reaches_clients_on_other_workers() {
        let cluster = start(2).await;

        // Two loopback sources that hash to different slots
        let alice_ip = Ipv4Addr::new(127, 0, 0, 1);
        let alice_slot = router::route_ip(IpAddr::V4(alice_ip), 2);
        let (bob_ip, bob_slot) = (2..=250u8)
            .map(|last| Ipv4Addr::new(127, 0, 0, last))
            .map(|ip| (ip, router::route_ip(IpAddr::V4(ip), 2)))
            .find(|(_, slot)| *slot != alice_slot)
            .unwrap();

        let mut alice = connect_from(alice_ip, cluster.addr).await;
        let mut bob = connect_from(bob_ip, cluster.addr).await;
        assert_eq!(read_line(&mut alice).await, greeting(alice_slot));
        assert_eq!(read_line(&mut bob).await, greeting(bob_slot));

        alice
            .get_mut()
            .write_all(b"hi from another worker\n")
            .await
            .unwrap();
        assert_eq!(read_line(&mut bob).await, "hi from another worker\n");
        assert_eq!(read_line(&mut alice).await, "hi from another worker\n");

        cluster.stop.send(()).unwrap();
        cluster.run.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_after_respawn_lands_on_same_slot() {
        let mut cluster = start(2).await;
        let source = Ipv4Addr::LOCALHOST;
        let slot = router::route_ip(IpAddr::V4(source), 2);
        let other = 1 - slot;

        let mut client = connect_from(source, cluster.addr).await;
        assert_eq!(read_line(&mut client).await, greeting(slot));
        let before = cluster.handle.slots().await.unwrap();

        cluster.handle.kill(slot).await.unwrap();
        timeout(WAIT, async {
            loop {
                match cluster.events.recv().await.unwrap() {
                    SupervisorEvent::Spawned {
                        slot: s,
                        generation: 2,
                        ..
                    } if s == slot => break,
                    SupervisorEvent::Spawned { slot: s, .. } => panic!("slot {s} respawned"),
                    _ => {}
                }
            }
        })
        .await
        .unwrap();

        // The old worker died with its connection
        assert_eq!(read_line(&mut client).await, "");

        let after = cluster.handle.slots().await.unwrap();
        assert_eq!(after[other], before[other]);
        assert_eq!(after[slot].generation, 2);

        let mut again = connect_from(source, cluster.addr).await;
        assert_eq!(read_line(&mut again).await, greeting(slot));

        cluster.stop.send(()).unwrap();
        let report = cluster.run.await.unwrap().unwrap();
        assert_eq!(report.dispatch.transferred, 2);
    }
}
