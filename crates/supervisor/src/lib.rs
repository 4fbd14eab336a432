//! # Supervisor
//!
//! Keeps exactly N worker processes alive, one per slot. A worker that exits
//! for any reason is relaunched in the same slot, so the router's mapping of
//! clients to slots stays valid across crashes.
//!
//! Each launch gets a fresh control channel; the master end lives in the
//! [`SlotTable`], which the dispatcher reads through [`SlotLookup`].

mod error;
mod launcher;
mod restart;
mod supervisor;
mod table;

pub use error::SupervisorError;
pub use launcher::{
    LaunchedWorker, ProcessLauncher, WorkerLauncher, WORKER_GENERATION_ENV, WORKER_SLOT_ENV,
};
pub use restart::{FailureTracker, RestartDecision, LAUNCH_RETRY_DELAY};
pub use supervisor::{Supervisor, SupervisorEvent};
pub use table::{SlotLookup, SlotSnapshot, SlotTable};
