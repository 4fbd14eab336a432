//! Control channel error types

use thiserror::Error;

/// Control channel errors
#[derive(Debug, Error)]
pub enum ControlError {
    /// Peer has closed its end
    #[error("control channel closed")]
    Closed,

    /// Socket buffer full; nothing was written
    #[error("control channel would block")]
    WouldBlock,

    /// Only part of a frame reached the socket; the channel is now unusable
    #[error("partial frame write: {written} of {expected} bytes")]
    PartialWrite { written: usize, expected: usize },

    /// Payload exceeds the frame length field
    #[error("frame payload too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// Malformed or unexpected data on the channel
    #[error("control protocol error: {message}")]
    Protocol { message: String },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControlError {
    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Map a send-side IO error onto the channel taxonomy
    pub(crate) fn from_send(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::WouldBlock => Self::WouldBlock,
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::NotConnected => {
                Self::Closed
            }
            _ => Self::Io(err),
        }
    }
}
