//! Master event loop
//!
//! One task owns the public listener, the supervisor and the dispatcher and
//! multiplexes accepts, supervisor signals and operator commands with
//! `select!`. Slot mutation and slot lookup both happen here, so the slot
//! table needs no locking.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use contracts::{ClusterBlueprint, RestartPolicy, SlotIndex, TransferPolicy};
use supervisor::{SlotSnapshot, Supervisor, SupervisorEvent, WorkerLauncher};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, instrument, warn};

use crate::dispatcher::Dispatcher;
use crate::error::DispatcherError;
use crate::metrics::{DispatchMetrics, DispatchSnapshot};

/// Pause after a failed accept (e.g. descriptor exhaustion)
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// Builder for a [`Cluster`]
pub struct ClusterBuilder<L: WorkerLauncher> {
    launcher: L,
    listen: SocketAddr,
    workers: usize,
    restart: RestartPolicy,
    transfer: TransferPolicy,
    shutdown_grace: Duration,
}

impl<L: WorkerLauncher> ClusterBuilder<L> {
    /// Defaults: `127.0.0.1:0`, one worker, immediate restart, drop on failure
    pub fn new(launcher: L) -> Self {
        Self {
            launcher,
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            workers: 1,
            restart: RestartPolicy::Immediate,
            transfer: TransferPolicy::Drop,
            shutdown_grace: Duration::from_secs(2),
        }
    }

    /// Take every setting from a validated blueprint
    pub fn from_blueprint(
        launcher: L,
        blueprint: &ClusterBlueprint,
    ) -> Result<Self, DispatcherError> {
        Ok(Self::new(launcher)
            .listen(blueprint.listen_addr()?)
            .workers(blueprint.worker_count())
            .restart_policy(blueprint.supervisor.restart.clone())
            .transfer_policy(blueprint.dispatcher.transfer_policy)
            .shutdown_grace(blueprint.shutdown_grace()))
    }

    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.listen = addr;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }

    pub fn transfer_policy(mut self, policy: TransferPolicy) -> Self {
        self.transfer = policy;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Bind the public listener. Workers are launched by [`Cluster::run_until`].
    #[instrument(name = "cluster_bind", skip(self), fields(listen = %self.listen, workers = self.workers))]
    pub async fn bind(self) -> Result<Cluster<L>, DispatcherError> {
        let listener = TcpListener::bind(self.listen)
            .await
            .map_err(|e| DispatcherError::bind(self.listen, e))?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        info!(addr = %listener.local_addr()?, "listening");

        Ok(Cluster {
            listener,
            supervisor: Supervisor::new(self.launcher, self.restart),
            dispatcher: Dispatcher::new(self.workers, self.transfer),
            workers: self.workers,
            shutdown_grace: self.shutdown_grace,
            command_tx,
            command_rx,
        })
    }
}

/// Operator commands for a running cluster
#[derive(Debug)]
enum ClusterCommand {
    Kill {
        slot: SlotIndex,
        reply: oneshot::Sender<Result<(), String>>,
    },
    Slots {
        reply: oneshot::Sender<Vec<SlotSnapshot>>,
    },
}

/// Handle for poking a running cluster from another task
#[derive(Debug, Clone)]
pub struct ClusterHandle {
    tx: mpsc::UnboundedSender<ClusterCommand>,
}

impl ClusterHandle {
    /// Kill the worker in `slot`; it is respawned under the restart policy
    pub async fn kill(&self, slot: SlotIndex) -> Result<(), String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ClusterCommand::Kill { slot, reply })
            .map_err(|_| "cluster stopped".to_string())?;
        rx.await.map_err(|_| "cluster stopped".to_string())?
    }

    /// Current slot table
    pub async fn slots(&self) -> Option<Vec<SlotSnapshot>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(ClusterCommand::Slots { reply }).ok()?;
        rx.await.ok()
    }
}

/// Final counters of a cluster run
#[derive(Debug, Clone)]
pub struct ClusterReport {
    pub dispatch: DispatchSnapshot,
    pub held_dropped: usize,
    pub final_events: Vec<SupervisorEvent>,
}

enum MasterSignal {
    Shutdown,
    Accepted(std::io::Result<(TcpStream, SocketAddr)>),
    Supervisor(Vec<SupervisorEvent>),
    Command(ClusterCommand),
}

/// The master process: listener, supervisor and dispatcher on one task
pub struct Cluster<L: WorkerLauncher> {
    listener: TcpListener,
    supervisor: Supervisor<L>,
    dispatcher: Dispatcher,
    workers: usize,
    shutdown_grace: Duration,
    command_tx: mpsc::UnboundedSender<ClusterCommand>,
    command_rx: mpsc::UnboundedReceiver<ClusterCommand>,
}

impl<L: WorkerLauncher> Cluster<L> {
    /// Address the public listener is bound to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Subscribe to worker lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.supervisor.subscribe()
    }

    /// Dispatch counters (live)
    pub fn metrics(&self) -> Arc<DispatchMetrics> {
        Arc::clone(self.dispatcher.metrics())
    }

    /// Handle for commands while running
    pub fn handle(&self) -> ClusterHandle {
        ClusterHandle {
            tx: self.command_tx.clone(),
        }
    }

    /// Launch the workers and serve until `shutdown` resolves.
    #[instrument(name = "cluster_run", skip_all, fields(workers = self.workers))]
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<ClusterReport, DispatcherError>
    where
        F: Future<Output = ()>,
    {
        let events = self.supervisor.start(self.workers)?;
        self.apply_events(&events);

        tokio::pin!(shutdown);
        loop {
            let signal = tokio::select! {
                _ = &mut shutdown => MasterSignal::Shutdown,
                accepted = self.listener.accept() => MasterSignal::Accepted(accepted),
                events = self.supervisor.tick() => MasterSignal::Supervisor(events),
                Some(command) = self.command_rx.recv() => MasterSignal::Command(command),
            };

            match signal {
                MasterSignal::Shutdown => break,
                MasterSignal::Accepted(Ok((stream, peer))) => {
                    self.dispatcher
                        .dispatch(stream, peer, self.supervisor.slots());
                }
                MasterSignal::Accepted(Err(e)) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                }
                MasterSignal::Supervisor(events) => self.apply_events(&events),
                MasterSignal::Command(command) => self.handle_command(command),
            }
        }

        info!("shutting down cluster");
        let held_dropped = self.dispatcher.clear_pending();
        let final_events = self.supervisor.shutdown(self.shutdown_grace).await;

        Ok(ClusterReport {
            dispatch: self.dispatcher.metrics().snapshot(),
            held_dropped,
            final_events,
        })
    }

    fn apply_events(&mut self, events: &[SupervisorEvent]) {
        for event in events {
            if let SupervisorEvent::Spawned { slot, .. } = event {
                self.dispatcher
                    .on_slot_spawned(*slot, self.supervisor.slots());
            }
        }
    }

    fn handle_command(&mut self, command: ClusterCommand) {
        match command {
            ClusterCommand::Kill { slot, reply } => {
                let result = self.supervisor.kill(slot).map_err(|e| e.to_string());
                let _ = reply.send(result);
            }
            ClusterCommand::Slots { reply } => {
                let _ = reply.send(self.supervisor.slots().snapshots());
            }
        }
    }
}
