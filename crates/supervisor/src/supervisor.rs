//! Worker supervisor
//!
//! Owns the slot table, launches one worker per slot and relaunches any slot
//! whose worker exits. Child processes are watched by one small monitor task
//! each; all slot mutation happens in [`Supervisor::tick`], on the caller's
//! task.

use std::os::unix::process::ExitStatusExt;
use std::time::{Duration, Instant};

use contracts::{ExitReason, Generation, RestartPolicy, SlotIndex, SlotState};
use tokio::process::Child;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

use crate::error::SupervisorError;
use crate::launcher::{LaunchedWorker, WorkerLauncher};
use crate::table::SlotTable;

/// How long to wait for killed workers to be reaped during shutdown
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle event of a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A worker process was started
    Spawned {
        slot: SlotIndex,
        generation: Generation,
        pid: Option<u32>,
    },
    /// A worker process terminated
    Exited {
        slot: SlotIndex,
        generation: Generation,
        status: ExitReason,
        lifetime: Duration,
    },
    /// The slot crossed the rapid-failure threshold
    Degraded {
        slot: SlotIndex,
        consecutive_failures: u32,
    },
    /// A worker could not be started
    LaunchFailed { slot: SlotIndex, error: String },
}

/// Exit notification from a monitor task
#[derive(Debug)]
struct WorkerExit {
    slot: SlotIndex,
    generation: Generation,
    reason: ExitReason,
}

/// A delayed respawn whose time has come
#[derive(Debug)]
struct RespawnDue {
    slot: SlotIndex,
    generation: Generation,
}

enum Signal {
    Exit(WorkerExit),
    Respawn(RespawnDue),
}

/// Worker supervisor
pub struct Supervisor<L: WorkerLauncher> {
    launcher: L,
    policy: RestartPolicy,
    table: SlotTable,
    started: bool,
    shutting_down: bool,
    exit_tx: mpsc::UnboundedSender<WorkerExit>,
    exit_rx: mpsc::UnboundedReceiver<WorkerExit>,
    respawn_tx: mpsc::UnboundedSender<RespawnDue>,
    respawn_rx: mpsc::UnboundedReceiver<RespawnDue>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl<L: WorkerLauncher> Supervisor<L> {
    /// Create a supervisor; nothing is launched until [`Supervisor::start`]
    pub fn new(launcher: L, policy: RestartPolicy) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let (respawn_tx, respawn_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            launcher,
            policy,
            table: SlotTable::default(),
            started: false,
            shutting_down: false,
            exit_tx,
            exit_rx,
            respawn_tx,
            respawn_rx,
            events,
        }
    }

    /// Read-only slot table
    pub fn slots(&self) -> &SlotTable {
        &self.table
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Launch `slot_count` workers, one per slot `0..slot_count`.
    ///
    /// A slot whose launch fails is scheduled for retry like any exit; the
    /// failure shows up as a [`SupervisorEvent::LaunchFailed`].
    #[instrument(name = "supervisor_start", skip(self))]
    pub fn start(&mut self, slot_count: usize) -> Result<Vec<SupervisorEvent>, SupervisorError> {
        if self.started {
            return Err(SupervisorError::AlreadyStarted);
        }
        self.started = true;
        self.table = SlotTable::new(slot_count);

        let mut events = Vec::new();
        for slot in 0..slot_count {
            self.spawn_slot(slot, &mut events);
        }
        self.publish(&events);

        info!(slot_count, alive = self.table.alive_count(), "workers started");
        Ok(events)
    }

    /// Wait for the next exit or due respawn and apply it.
    ///
    /// Cancel-safe: if the future is dropped before it completes, nothing
    /// has been consumed. Returns the events produced (also broadcast).
    pub async fn tick(&mut self) -> Vec<SupervisorEvent> {
        let signal = tokio::select! {
            Some(exit) = self.exit_rx.recv() => Signal::Exit(exit),
            Some(due) = self.respawn_rx.recv() => Signal::Respawn(due),
            else => return Vec::new(),
        };

        let mut events = Vec::new();
        match signal {
            Signal::Exit(exit) => self.handle_exit(exit, &mut events),
            Signal::Respawn(due) => self.handle_respawn(due, &mut events),
        }
        self.publish(&events);
        events
    }

    /// Forcibly terminate the worker in `slot`.
    ///
    /// The exit is reported through [`Supervisor::tick`] and the slot is
    /// respawned under the normal policy.
    pub fn kill(&mut self, slot: SlotIndex) -> Result<(), SupervisorError> {
        let entry = self
            .table
            .get_mut(slot)
            .ok_or(SupervisorError::UnknownSlot(slot))?;
        let kill = entry.kill.take().ok_or(SupervisorError::NotRunning(slot))?;
        // An error means the monitor already finished; its exit is queued
        let _ = kill.send(());
        info!(slot, generation = entry.generation, "worker kill requested");
        Ok(())
    }

    /// Stop all workers.
    ///
    /// Respawning stops, every worker gets a `shutdown` control frame and
    /// `grace` to exit; the remainder is killed.
    #[instrument(name = "supervisor_shutdown", skip(self))]
    pub async fn shutdown(&mut self, grace: Duration) -> Vec<SupervisorEvent> {
        self.shutting_down = true;
        let mut events = Vec::new();

        for (slot, entry) in self.table.iter() {
            if let Some(control) = &entry.control {
                if let Err(e) = control.shutdown() {
                    debug!(slot, error = %e, "shutdown frame not delivered");
                }
            }
        }

        self.reap_until(Instant::now() + grace, &mut events).await;

        let remaining = self.unreaped_count();
        if remaining > 0 {
            warn!(remaining, "workers did not exit within grace period, killing");
            for (_, entry) in self.table.iter_mut() {
                if let Some(kill) = entry.kill.take() {
                    let _ = kill.send(());
                }
            }
            self.reap_until(Instant::now() + KILL_REAP_TIMEOUT, &mut events)
                .await;
        }

        self.publish(&events);
        info!(exited = events.len(), "supervisor shut down");
        events
    }

    async fn reap_until(&mut self, deadline: Instant, events: &mut Vec<SupervisorEvent>) {
        while self.has_unreaped() {
            match tokio::time::timeout_at(deadline.into(), self.exit_rx.recv()).await {
                Ok(Some(exit)) => self.handle_exit(exit, events),
                Ok(None) | Err(_) => break,
            }
        }
    }

    fn has_unreaped(&self) -> bool {
        self.unreaped_count() > 0
    }

    /// Slots whose current incarnation has not reported its exit yet
    fn unreaped_count(&self) -> usize {
        self.table.alive_count()
    }

    fn spawn_slot(&mut self, slot: SlotIndex, events: &mut Vec<SupervisorEvent>) {
        let Some(entry) = self.table.get_mut(slot) else {
            return;
        };
        entry.generation += 1;
        entry.state = SlotState::Spawning;
        let generation = entry.generation;
        observability::record_slot_state(slot, SlotState::Spawning);

        match self.launcher.launch(slot, generation) {
            Ok(LaunchedWorker { child, control }) => {
                let pid = child.id();
                let (kill_tx, kill_rx) = oneshot::channel();
                tokio::spawn(monitor_worker(
                    slot,
                    generation,
                    child,
                    kill_rx,
                    self.exit_tx.clone(),
                ));

                let Some(entry) = self.table.get_mut(slot) else {
                    return;
                };
                entry.state = SlotState::Running;
                entry.pid = pid;
                entry.control = Some(control);
                entry.kill = Some(kill_tx);
                entry.started_at = Some(Instant::now());

                observability::record_worker_spawned(slot);
                observability::record_slot_state(slot, SlotState::Running);
                info!(slot, generation, pid = ?pid, "worker spawned");
                events.push(SupervisorEvent::Spawned {
                    slot,
                    generation,
                    pid,
                });
            }
            Err(e) => {
                error!(slot, generation, error = %e, "worker launch failed");
                events.push(SupervisorEvent::LaunchFailed {
                    slot,
                    error: e.to_string(),
                });
                if let Some(entry) = self.table.get_mut(slot) {
                    entry.state = SlotState::Exited;
                    entry.clear_process();
                    entry.started_at = None;
                }
                observability::record_slot_state(slot, SlotState::Exited);
                self.schedule_restart(slot, Duration::ZERO, true, events);
            }
        }
    }

    fn handle_exit(&mut self, exit: WorkerExit, events: &mut Vec<SupervisorEvent>) {
        let WorkerExit {
            slot,
            generation,
            reason,
        } = exit;

        let Some(entry) = self.table.get_mut(slot) else {
            warn!(slot, "exit for unknown slot");
            return;
        };
        if entry.generation != generation || entry.started_at.is_none() {
            debug!(
                slot,
                generation,
                current = entry.generation,
                "stale exit notification ignored"
            );
            return;
        }

        let lifetime = entry
            .started_at
            .take()
            .map(|t| t.elapsed())
            .unwrap_or_default();
        entry.state = SlotState::Exited;
        entry.clear_process();

        observability::record_worker_exited(slot, lifetime.as_secs_f64());
        observability::record_slot_state(slot, SlotState::Exited);
        if self.shutting_down {
            info!(slot, generation, status = %reason, "worker exited");
        } else {
            warn!(
                slot,
                generation,
                status = %reason,
                lifetime_ms = lifetime.as_millis() as u64,
                "worker exited"
            );
        }
        events.push(SupervisorEvent::Exited {
            slot,
            generation,
            status: reason,
            lifetime,
        });

        if !self.shutting_down {
            self.schedule_restart(slot, lifetime, false, events);
        }
    }

    fn schedule_restart(
        &mut self,
        slot: SlotIndex,
        lifetime: Duration,
        launch_failed: bool,
        events: &mut Vec<SupervisorEvent>,
    ) {
        if self.shutting_down {
            return;
        }
        let Some(entry) = self.table.get_mut(slot) else {
            return;
        };

        let decision = entry.failures.on_exit(&self.policy, lifetime, launch_failed);
        let generation = entry.generation;
        if let Some(consecutive_failures) = decision.degraded {
            entry.state = SlotState::Degraded;
            observability::record_slot_state(slot, SlotState::Degraded);
            warn!(slot, consecutive_failures, "slot degraded");
            events.push(SupervisorEvent::Degraded {
                slot,
                consecutive_failures,
            });
        }

        if decision.delay.is_zero() {
            self.spawn_slot(slot, events);
            return;
        }

        let respawn_tx = self.respawn_tx.clone();
        debug!(
            slot,
            delay_ms = decision.delay.as_millis() as u64,
            "respawn scheduled"
        );
        tokio::spawn(async move {
            tokio::time::sleep(decision.delay).await;
            let _ = respawn_tx.send(RespawnDue { slot, generation });
        });
    }

    fn handle_respawn(&mut self, due: RespawnDue, events: &mut Vec<SupervisorEvent>) {
        if self.shutting_down {
            return;
        }
        let Some(entry) = self.table.get_mut(due.slot) else {
            return;
        };
        let waiting = matches!(entry.state, SlotState::Exited | SlotState::Degraded);
        if entry.generation != due.generation || !waiting {
            debug!(slot = due.slot, "stale respawn ignored");
            return;
        }
        self.spawn_slot(due.slot, events);
    }

    fn publish(&self, events: &[SupervisorEvent]) {
        for event in events {
            // No subscribers is fine
            let _ = self.events.send(event.clone());
        }
    }
}

/// Wait for one child to end, then report it.
///
/// A kill request (or the supervisor going away) kills the child first.
async fn monitor_worker(
    slot: SlotIndex,
    generation: Generation,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: mpsc::UnboundedSender<WorkerExit>,
) {
    let waited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill_rx => None,
    };

    let status = match waited {
        Some(status) => status,
        None => {
            if let Err(e) = child.start_kill() {
                debug!(slot, generation, error = %e, "kill failed");
            }
            child.wait().await
        }
    };

    let reason = match status {
        Ok(status) => ExitReason {
            code: status.code(),
            signal: status.signal(),
        },
        Err(e) => {
            error!(slot, generation, error = %e, "failed to wait for worker");
            ExitReason::unknown()
        }
    };

    let _ = exit_tx.send(WorkerExit {
        slot,
        generation,
        reason,
    });
}
