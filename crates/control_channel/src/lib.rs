//! # Control Channel
//!
//! Per-worker channel between the master and one worker process: a Unix
//! stream socket pair carrying small framed messages, with live connection
//! descriptors attached as SCM_RIGHTS ancillary data.
//!
//! The master keeps a [`ControlSender`]; the worker's end is installed as
//! descriptor [`CONTROL_FD`] in the child and adopted there with
//! [`ControlReceiver::from_inherited`].

mod error;
mod fd;
mod frame;
mod receiver;
mod sender;

pub use error::ControlError;
pub use fd::{is_socket, prepare_child_fd, recv_with_fds, send_with_fd, MAX_FDS_PER_READ};
pub use frame::{frame_kind, ControlFrame, FrameDecoder, Received, HEADER_LEN, MAX_PAYLOAD};
pub use receiver::ControlReceiver;
pub use sender::ControlSender;

/// Descriptor number the worker's control socket occupies
pub const CONTROL_FD: std::os::fd::RawFd = 3;

/// Environment variable overriding [`CONTROL_FD`]
pub const CONTROL_FD_ENV: &str = "STICKY_CONTROL_FD";

/// Create a connected control pair: master sender and the child's end.
///
/// The child end is close-on-exec; [`prepare_child_fd`] clears that on the
/// copy installed in the worker.
pub fn pair() -> Result<(ControlSender, std::os::unix::net::UnixStream), ControlError> {
    let (master, child) = std::os::unix::net::UnixStream::pair()?;
    Ok((ControlSender::new(master)?, child))
}
