//! Worker control loop
//!
//! One task multiplexes control frames and local accepts. Each connection is
//! served on its own task; all of them are aborted when the worker stops, the
//! same way they would die with the process.

use std::fmt;
use std::sync::Arc;

use contracts::SlotIndex;
use control_channel::{ControlError, ControlReceiver, Received};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::app::{AppContext, Application, WorkerFanout};
use crate::error::WorkerError;
use crate::server::{Incoming, Injector, LocalServer, Origin};

/// Why a worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Master sent a shutdown frame
    Shutdown,
    /// Control channel reached end-of-stream
    MasterGone,
}

/// Counters of one worker run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub slot: SlotIndex,
    pub forwarded: u64,
    pub native: u64,
    pub rejected_transfers: u64,
    pub control_messages: u64,
    pub degraded: bool,
    pub reason: StopReason,
}

impl fmt::Display for WorkerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "worker {} stopped ({:?}): {} forwarded, {} native, {} rejected, {} control, degraded={}",
            self.slot,
            self.reason,
            self.forwarded,
            self.native,
            self.rejected_transfers,
            self.control_messages,
            self.degraded
        )
    }
}

enum WorkerSignal {
    Control(Result<Option<Received>, ControlError>),
    Incoming(Result<Incoming, WorkerError>),
    ConnectionDone,
}

/// Runs one worker: control channel in, application tasks out
pub struct WorkerRuntime<A> {
    slot: SlotIndex,
    app: Arc<A>,
    fanout: WorkerFanout,
    topics: Vec<String>,
}

impl<A> WorkerRuntime<A>
where
    A: Application + Sync + 'static,
{
    pub fn new(slot: SlotIndex, app: A, fanout: WorkerFanout) -> Self {
        Self {
            slot,
            app: Arc::new(app),
            fanout,
            topics: Vec::new(),
        }
    }

    /// Topics to attach before serving
    pub fn topics(mut self, topics: Vec<String>) -> Self {
        self.topics = topics;
        self
    }

    /// Serve until the master says stop or goes away.
    ///
    /// Control-channel errors are fatal: the master treats the exit like any
    /// other crash and respawns the slot.
    #[instrument(name = "worker_run", skip_all, fields(slot = self.slot, app = self.app.name()))]
    pub async fn run(
        self,
        mut server: LocalServer,
        mut control: ControlReceiver,
    ) -> Result<WorkerReport, WorkerError> {
        self.fanout.attach_topics(&self.topics).await;
        info!(
            local = %server.local_addr()?,
            transport = self.fanout.transport_name(),
            degraded = self.fanout.is_degraded(),
            "worker ready"
        );

        let injector = server.injector();
        let mut connections = JoinSet::new();
        let mut report = WorkerReport {
            slot: self.slot,
            forwarded: 0,
            native: 0,
            rejected_transfers: 0,
            control_messages: 0,
            degraded: false,
            reason: StopReason::MasterGone,
        };

        loop {
            let signal = tokio::select! {
                frame = control.recv() => WorkerSignal::Control(frame),
                incoming = server.accept() => WorkerSignal::Incoming(incoming),
                Some(_) = connections.join_next(), if !connections.is_empty() => {
                    WorkerSignal::ConnectionDone
                }
            };

            match signal {
                WorkerSignal::Control(Ok(Some(Received::Transfer { peer, fd }))) => {
                    self.adopt(&injector, fd, peer, &mut report);
                }
                WorkerSignal::Control(Ok(Some(Received::Message(message)))) => {
                    report.control_messages += 1;
                    self.app.on_control(message).await;
                }
                WorkerSignal::Control(Ok(Some(Received::Shutdown))) => {
                    info!("shutdown requested by master");
                    report.reason = StopReason::Shutdown;
                    break;
                }
                WorkerSignal::Control(Ok(None)) => {
                    warn!("control channel closed, master gone");
                    report.reason = StopReason::MasterGone;
                    break;
                }
                WorkerSignal::Control(Err(e)) => {
                    connections.shutdown().await;
                    return Err(e.into());
                }
                WorkerSignal::Incoming(Ok(incoming)) => {
                    match incoming.origin {
                        Origin::Native => report.native += 1,
                        Origin::Forwarded => report.forwarded += 1,
                    }
                    let app = Arc::clone(&self.app);
                    let context = AppContext {
                        slot: self.slot,
                        fanout: self.fanout.clone(),
                    };
                    connections.spawn(async move {
                        app.serve(incoming, context).await;
                    });
                }
                WorkerSignal::Incoming(Err(e)) => {
                    warn!(error = %e, "local accept failed");
                }
                WorkerSignal::ConnectionDone => {}
            }
        }

        debug!(open = connections.len(), "dropping client connections");
        connections.shutdown().await;
        report.degraded = self.fanout.is_degraded();
        info!(%report, "worker stopped");
        Ok(report)
    }

    fn adopt(
        &self,
        injector: &Injector,
        fd: std::os::fd::OwnedFd,
        peer: std::net::SocketAddr,
        report: &mut WorkerReport,
    ) {
        match injector.inject_fd(fd, peer) {
            Ok(()) => debug!(%peer, "connection transferred in"),
            Err(e) => {
                report.rejected_transfers += 1;
                warn!(%peer, error = %e, "transferred connection unusable");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::LineChat;
    use bytes::Bytes;
    use control_channel::{ControlFrame, ControlSender};
    use fanout::{ClusterTransport, Fanout, LocalBus};
    use std::net::SocketAddr;
    use std::os::fd::AsFd;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn start_worker(
        slot: SlotIndex,
        bus: &LocalBus,
    ) -> (ControlSender, JoinHandle<Result<WorkerReport, WorkerError>>) {
        let (sender, child) = control_channel::pair().unwrap();
        let control = ControlReceiver::from_std(child).unwrap();
        let server = LocalServer::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let fanout = Fanout::new(ClusterTransport::Local(bus.clone()), 16);
        let runtime = WorkerRuntime::new(slot, LineChat::default(), fanout)
            .topics(vec!["chat message".to_string()]);
        (sender, tokio::spawn(runtime.run(server, control)))
    }

    /// Connect a client through an outside listener and hand the accepted
    /// side to `sender`, the way the master does.
    async fn forward_client(sender: &ControlSender) -> BufReader<TcpStream> {
        let outside = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(outside.local_addr().unwrap())
            .await
            .unwrap();
        let (accepted, peer) = outside.accept().await.unwrap();
        let accepted = accepted.into_std().unwrap();
        sender.transfer(accepted.as_fd(), peer).unwrap();
        BufReader::new(client)
    }

    async fn read_line(client: &mut BufReader<TcpStream>) -> String {
        let mut line = String::new();
        timeout(WAIT, client.read_line(&mut line))
            .await
            .unwrap()
            .unwrap();
        line
    }

    #[tokio::test]
    async fn test_forwarded_client_is_served() {
        let bus = LocalBus::new(16);
        let (sender, worker) = start_worker(0, &bus).await;

        let mut client = forward_client(&sender).await;
        assert_eq!(read_line(&mut client).await, "* connected to worker 0\n");

        client.get_mut().write_all(b"hi there\n").await.unwrap();
        assert_eq!(read_line(&mut client).await, "hi there\n");

        sender.shutdown().unwrap();
        let report = timeout(WAIT, worker).await.unwrap().unwrap().unwrap();
        assert_eq!(report.reason, StopReason::Shutdown);
        assert_eq!(report.forwarded, 1);
        assert_eq!(report.native, 0);
        assert!(!report.degraded);
    }

    #[tokio::test]
    async fn test_chat_crosses_workers() {
        let bus = LocalBus::new(16);
        let (sender_a, worker_a) = start_worker(0, &bus).await;
        let (sender_b, worker_b) = start_worker(1, &bus).await;

        let mut alice = forward_client(&sender_a).await;
        let mut bob = forward_client(&sender_b).await;
        assert_eq!(read_line(&mut alice).await, "* connected to worker 0\n");
        assert_eq!(read_line(&mut bob).await, "* connected to worker 1\n");

        alice.get_mut().write_all(b"hello bob\n").await.unwrap();
        assert_eq!(read_line(&mut bob).await, "hello bob\n");
        assert_eq!(read_line(&mut alice).await, "hello bob\n");

        sender_a.shutdown().unwrap();
        sender_b.shutdown().unwrap();
        timeout(WAIT, worker_a).await.unwrap().unwrap().unwrap();
        timeout(WAIT, worker_b).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_master_gone_stops_worker_and_drops_clients() {
        let bus = LocalBus::new(16);
        let (sender, worker) = start_worker(2, &bus).await;
        let mut client = forward_client(&sender).await;
        assert_eq!(read_line(&mut client).await, "* connected to worker 2\n");

        drop(sender);
        let report = timeout(WAIT, worker).await.unwrap().unwrap().unwrap();
        assert_eq!(report.reason, StopReason::MasterGone);

        // Serving task was aborted, so the connection is closed
        assert_eq!(read_line(&mut client).await, "");
    }

    #[tokio::test]
    async fn test_control_message_reaches_application() {
        let bus = LocalBus::new(16);
        let (sender, worker) = start_worker(0, &bus).await;

        sender
            .send(&ControlFrame::Message(Bytes::from_static(b"reload")))
            .unwrap();
        sender.shutdown().unwrap();

        let report = timeout(WAIT, worker).await.unwrap().unwrap().unwrap();
        assert_eq!(report.control_messages, 1);
        assert_eq!(report.reason, StopReason::Shutdown);
    }
}
