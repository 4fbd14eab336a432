//! Worker side of the control channel

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tokio::io::Interest;
use tokio::net::UnixStream;
use tracing::{debug, trace, warn};

use crate::error::ControlError;
use crate::fd::{is_socket, recv_with_fds};
use crate::frame::{FrameDecoder, Received};
use crate::{CONTROL_FD, CONTROL_FD_ENV};

const READ_BUF_LEN: usize = 4096;

/// Reads control frames sent by the master
#[derive(Debug)]
pub struct ControlReceiver {
    stream: UnixStream,
    decoder: FrameDecoder,
    eof: bool,
}

impl ControlReceiver {
    /// Wrap an already-connected stream (in-process tests, embedding)
    pub fn from_std(stream: std::os::unix::net::UnixStream) -> Result<Self, ControlError> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream: UnixStream::from_std(stream)?,
            decoder: FrameDecoder::new(),
            eof: false,
        })
    }

    /// Adopt the control socket inherited from the master.
    ///
    /// Uses the descriptor named by `STICKY_CONTROL_FD`, or [`CONTROL_FD`].
    /// Must be called at most once per process, inside a tokio runtime.
    pub fn from_inherited() -> Result<Self, ControlError> {
        let fd: RawFd = match std::env::var(CONTROL_FD_ENV) {
            Ok(value) => value.parse().map_err(|_| {
                ControlError::protocol(format!("{CONTROL_FD_ENV}='{value}' is not a descriptor"))
            })?,
            Err(_) => CONTROL_FD,
        };

        if !is_socket(fd) {
            return Err(ControlError::protocol(format!(
                "descriptor {fd} is not a control socket; was this process started by the master?"
            )));
        }

        // SAFETY: the descriptor was placed by the master for this process
        // and nothing else in the process owns it.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        Self::from_std(std::os::unix::net::UnixStream::from(owned))
    }

    /// Next control frame, or `None` once the master has closed the channel.
    ///
    /// Cancel-safe: a dropped call loses no bytes or descriptors.
    pub async fn recv(&mut self) -> Result<Option<Received>, ControlError> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                return Ok(Some(frame));
            }

            if self.eof {
                if self.decoder.buffered() > 0 {
                    return Err(ControlError::protocol(format!(
                        "channel closed mid-frame with {} bytes buffered",
                        self.decoder.buffered()
                    )));
                }
                return Ok(None);
            }

            let mut buf = [0u8; READ_BUF_LEN];
            let raw = self.stream.as_raw_fd();
            let (n, fds, truncated) = self
                .stream
                .async_io(Interest::READABLE, || recv_with_fds(raw, &mut buf))
                .await?;

            if truncated {
                warn!("control message ancillary data truncated, descriptors lost");
            }
            trace!(bytes = n, fds = fds.len(), "control read");

            if n == 0 && fds.is_empty() {
                debug!("control channel closed by master");
                self.eof = true;
                continue;
            }
            self.decoder.feed(&buf[..n], fds);
        }
    }
}
