//! Worker process launching

use std::ffi::{OsStr, OsString};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::process::Stdio;

use contracts::{Generation, SlotIndex};
use control_channel::{prepare_child_fd, ControlSender, CONTROL_FD, CONTROL_FD_ENV};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::SupervisorError;

/// Environment variable carrying the worker's slot index
pub const WORKER_SLOT_ENV: &str = "STICKY_WORKER_SLOT";

/// Environment variable carrying the worker's generation
pub const WORKER_GENERATION_ENV: &str = "STICKY_WORKER_GENERATION";

/// A freshly started worker
#[derive(Debug)]
pub struct LaunchedWorker {
    /// The child process
    pub child: Child,
    /// Master end of the worker's control channel
    pub control: ControlSender,
}

/// Starts worker processes
///
/// Implementations decide what a worker is; the supervisor only needs a
/// child to wait on and a control channel to it.
pub trait WorkerLauncher: Send + 'static {
    /// Start the worker for `slot`. Called from inside the tokio runtime.
    fn launch(
        &mut self,
        slot: SlotIndex,
        generation: Generation,
    ) -> Result<LaunchedWorker, SupervisorError>;
}

/// Launches workers by executing a program
///
/// The child's control socket is installed as descriptor
/// [`CONTROL_FD`]; the slot and generation are passed in the environment.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl ProcessLauncher {
    /// Launch `program` with no arguments
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Launch the currently running executable (the usual worker mode)
    pub fn current_exe() -> Result<Self, SupervisorError> {
        let exe = std::env::current_exe().map_err(|e| SupervisorError::launch(0, e))?;
        Ok(Self::new(exe))
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Set an environment variable for every worker
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_owned(), value.as_ref().to_owned()));
        self
    }

    /// Program path
    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(
        &mut self,
        slot: SlotIndex,
        generation: Generation,
    ) -> Result<LaunchedWorker, SupervisorError> {
        let (control, child_end) = control_channel::pair()?;
        let child_fd = child_end.as_raw_fd();

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .env(WORKER_SLOT_ENV, slot.to_string())
            .env(WORKER_GENERATION_ENV, generation.to_string())
            .env(CONTROL_FD_ENV, CONTROL_FD.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        // SAFETY: prepare_child_fd only calls dup2/fcntl, which are
        // async-signal-safe.
        unsafe {
            command.pre_exec(move || prepare_child_fd(child_fd));
        }

        let child = command
            .spawn()
            .map_err(|e| SupervisorError::launch(slot, e))?;

        // The child holds its own copy now
        drop(child_end);

        debug!(
            slot,
            generation,
            pid = ?child.id(),
            program = %self.program.display(),
            "worker process started"
        );

        Ok(LaunchedWorker { child, control })
    }
}
