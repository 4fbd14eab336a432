//! In-process workers for end-to-end tests
//!
//! Each "worker process" is a `cat` child standing in for the OS process and
//! a tokio task running the real [`WorkerRuntime`]. The task owns the child's
//! stdin, so the child exits when the worker stops, and killing the child
//! closes the control channel, which stops the worker.

use std::net::SocketAddr;
use std::process::Stdio;

use contracts::{Generation, SlotIndex};
use control_channel::ControlReceiver;
use fanout::{ClusterTransport, Fanout, LocalBus};
use supervisor::{LaunchedWorker, SupervisorError, WorkerLauncher};
use tokio::process::Command;
use tracing::{info_span, warn, Instrument};
use worker::{LineChat, LocalServer, WorkerRuntime, CHAT_TOPIC};

/// Launches workers as tasks of the current runtime sharing one [`LocalBus`]
#[derive(Debug, Clone)]
pub struct InProcessLauncher {
    bus: LocalBus,
}

impl InProcessLauncher {
    pub fn new(bus: LocalBus) -> Self {
        Self { bus }
    }
}

impl WorkerLauncher for InProcessLauncher {
    fn launch(
        &mut self,
        slot: SlotIndex,
        generation: Generation,
    ) -> Result<LaunchedWorker, SupervisorError> {
        let (control, child_end) = control_channel::pair()?;

        let mut child = Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SupervisorError::launch(slot, e))?;
        let lifeline = child.stdin.take();

        let fanout = Fanout::new(ClusterTransport::Local(self.bus.clone()), 64);
        let span = info_span!("worker", slot, generation);
        tokio::spawn(
            async move {
                let _lifeline = lifeline;
                let result = async {
                    let control = ControlReceiver::from_std(child_end)?;
                    let server = LocalServer::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
                    WorkerRuntime::new(slot, LineChat::default(), fanout)
                        .topics(vec![CHAT_TOPIC.to_string()])
                        .run(server, control)
                        .await
                }
                .await;
                if let Err(e) = result {
                    warn!(error = %e, "in-process worker failed");
                }
            }
            .instrument(span),
        );

        Ok(LaunchedWorker { child, control })
    }
}
