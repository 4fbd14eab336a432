//! # Contracts
//!
//! Shared types for every crate of the cluster: the configuration blueprint,
//! slot identity and state, restart/transfer policies and the common error.
//! Business crates depend on this crate; it depends on none of them.
//!
//! ## Slot model
//! - A slot is a fixed index in `[0, N)` that survives worker restarts
//! - The generation counter tells two incarnations of the same slot apart

mod blueprint;
mod error;
mod policy;
mod slot;

pub use blueprint::*;
pub use error::*;
pub use policy::*;
pub use slot::*;
