//! Worker error types

use std::net::SocketAddr;

use thiserror::Error;

/// Worker runtime errors
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Local application server could not be bound
    #[error("failed to bind local server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Control channel failed
    #[error("control channel error: {0}")]
    Control(#[from] control_channel::ControlError),

    /// Broadcast setup failed
    #[error("fanout error: {0}")]
    Fanout(#[from] fanout::FanoutError),

    /// Configuration error (from contract)
    #[error("configuration error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// Local server stopped accepting
    #[error("local server closed")]
    ServerClosed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Create a bind error
    pub fn bind(addr: SocketAddr, source: std::io::Error) -> Self {
        Self::Bind { addr, source }
    }
}
