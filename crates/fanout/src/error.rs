//! Fanout error types

use thiserror::Error;

/// Broadcast transport errors
///
/// These never reach the application: [`crate::Fanout`] turns them into
/// local-only delivery.
#[derive(Debug, Error)]
pub enum FanoutError {
    /// Transport rejected an operation
    #[error("{transport} transport error: {message}")]
    Transport { transport: String, message: String },

    /// Redis client error
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Transport has been shut down
    #[error("transport closed")]
    Closed,
}

impl FanoutError {
    /// Create a transport error
    pub fn transport(transport: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            transport: transport.into(),
            message: message.into(),
        }
    }
}
