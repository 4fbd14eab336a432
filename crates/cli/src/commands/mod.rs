//! Command implementations.

mod info;
mod run;
mod validate;
mod worker;

pub use info::run_info;
pub use run::run_cluster;
pub use validate::run_validate;
pub use worker::run_worker;
