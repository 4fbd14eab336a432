//! # Worker
//!
//! Worker-process runtime.
//!
//! Responsibilities:
//! - Run the application on a loopback server
//! - Turn connections handed over by the master into ordinary local
//!   connections
//! - Give every connection access to the worker's broadcast [`fanout::Fanout`]
//! - Stop when the master says so or disappears

pub mod app;
pub mod chat;
pub mod error;
pub mod runtime;
pub mod server;

pub use app::{AppContext, Application, WorkerFanout};
pub use chat::{LineChat, CHAT_TOPIC};
pub use error::WorkerError;
pub use runtime::{StopReason, WorkerReport, WorkerRuntime};
pub use server::{Incoming, Injector, LocalServer, Origin};
