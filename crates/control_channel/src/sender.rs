//! Master side of a worker's control channel

use std::net::SocketAddr;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::error::ControlError;
use crate::fd::send_with_fd;
use crate::frame::ControlFrame;

/// Writes control frames to one worker.
///
/// Every send is a single non-blocking `sendmsg()`. A full socket buffer
/// returns [`ControlError::WouldBlock`] with nothing written; a short write
/// leaves the stream desynchronised, so the channel is shut down and marked
/// broken.
#[derive(Debug)]
pub struct ControlSender {
    stream: UnixStream,
    broken: AtomicBool,
}

impl ControlSender {
    /// Wrap the master end of a control socket pair
    pub fn new(stream: UnixStream) -> Result<Self, ControlError> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream,
            broken: AtomicBool::new(false),
        })
    }

    /// True once the channel has failed and must not be used again
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// Send a frame with no descriptor
    pub fn send(&self, frame: &ControlFrame) -> Result<(), ControlError> {
        if let ControlFrame::Transfer { .. } = frame {
            return Err(ControlError::protocol(
                "transfer frames must carry a descriptor; use ControlSender::transfer",
            ));
        }
        let bytes = frame.encode()?;
        self.write_frame(&bytes, None)
    }

    /// Hand a live connection to the worker.
    ///
    /// On success the worker holds its own copy of the descriptor; the caller
    /// should close the local one.
    pub fn transfer(&self, conn: BorrowedFd<'_>, peer: SocketAddr) -> Result<(), ControlError> {
        let bytes = ControlFrame::Transfer { peer }.encode()?;
        self.write_frame(&bytes, Some(conn))
    }

    /// Ask the worker to stop
    pub fn shutdown(&self) -> Result<(), ControlError> {
        self.send(&ControlFrame::Shutdown)
    }

    fn write_frame(&self, bytes: &[u8], fd: Option<BorrowedFd<'_>>) -> Result<(), ControlError> {
        if self.is_broken() {
            return Err(ControlError::Closed);
        }

        let written = match send_with_fd(self.stream.as_raw_fd(), bytes, fd) {
            Ok(n) => n,
            Err(e) => {
                let err = ControlError::from_send(e);
                if matches!(err, ControlError::Closed) {
                    self.mark_broken();
                }
                return Err(err);
            }
        };

        if written < bytes.len() {
            warn!(
                written,
                expected = bytes.len(),
                "short write on control channel, closing it"
            );
            self.mark_broken();
            let _ = self.stream.shutdown(std::net::Shutdown::Both);
            return Err(ControlError::PartialWrite {
                written,
                expected: bytes.len(),
            });
        }

        debug!(len = bytes.len(), with_fd = fd.is_some(), "control frame sent");
        Ok(())
    }

    fn mark_broken(&self) {
        self.broken.store(true, Ordering::Release);
    }
}

impl AsFd for ControlSender {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}
