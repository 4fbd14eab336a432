//! SCM_RIGHTS send/receive over a Unix domain socket.
//!
//! The kernel duplicates a passed descriptor into the receiving process; the
//! sender keeps its own copy and must close it separately.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// Most descriptors accepted from a single `recvmsg()`
pub const MAX_FDS_PER_READ: usize = 32;

const FD_SIZE: usize = std::mem::size_of::<libc::c_int>();

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL | libc::MSG_DONTWAIT;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = libc::MSG_DONTWAIT;

#[cfg(any(target_os = "linux", target_os = "android"))]
const RECV_FLAGS: libc::c_int = libc::MSG_DONTWAIT | libc::MSG_CMSG_CLOEXEC;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const RECV_FLAGS: libc::c_int = libc::MSG_DONTWAIT;

/// Send `data`, optionally attaching `fd` as SCM_RIGHTS ancillary data.
///
/// Never blocks. Returns the number of bytes written; the descriptor, if any,
/// travels with the first byte.
pub fn send_with_fd(sock: RawFd, data: &[u8], fd: Option<BorrowedFd<'_>>) -> io::Result<usize> {
    let cmsg_space = unsafe { libc::CMSG_SPACE(FD_SIZE as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    let mut iov = libc::iovec {
        iov_base: data.as_ptr() as *mut libc::c_void,
        iov_len: data.len(),
    };

    // SAFETY: msghdr is plain old data; zeroed is a valid empty header and
    // keeps platform padding fields initialised.
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;

    if let Some(fd) = fd {
        msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = cmsg_space as _;

        // SAFETY: cmsg_buf is CMSG_SPACE(one fd) bytes, so the first header
        // and its data slot are in bounds.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(FD_SIZE as u32) as _;
            let data_ptr = libc::CMSG_DATA(cmsg) as *mut libc::c_int;
            std::ptr::write_unaligned(data_ptr, fd.as_raw_fd());
        }
    }

    loop {
        // SAFETY: sock is a live socket, msg points at buffers that outlive the call.
        let n = unsafe { libc::sendmsg(sock, &msg, SEND_FLAGS) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Non-blocking receive into `buf`, collecting any SCM_RIGHTS descriptors.
///
/// Returns `(bytes_read, descriptors, control_truncated)`. Zero bytes with no
/// descriptors means the peer closed its end.
pub fn recv_with_fds(sock: RawFd, buf: &mut [u8]) -> io::Result<(usize, Vec<OwnedFd>, bool)> {
    let cmsg_space = unsafe { libc::CMSG_SPACE((FD_SIZE * MAX_FDS_PER_READ) as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };

    // SAFETY: see send_with_fd
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_space as _;

    let n = loop {
        // SAFETY: sock is a live socket, msg points at buffers that outlive the call.
        let n = unsafe { libc::recvmsg(sock, &mut msg, RECV_FLAGS) };
        if n >= 0 {
            break n as usize;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    };

    let mut fds = Vec::new();
    // SAFETY: the kernel filled msg_control with well-formed cmsg headers;
    // every SCM_RIGHTS descriptor is now owned by this process.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data = libc::CMSG_DATA(cmsg);
                let count = ((*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize) / FD_SIZE;
                for i in 0..count {
                    let fd: libc::c_int =
                        std::ptr::read_unaligned(data.add(i * FD_SIZE) as *const libc::c_int);
                    let owned = OwnedFd::from_raw_fd(fd);
                    #[cfg(not(any(target_os = "linux", target_os = "android")))]
                    set_cloexec(owned.as_raw_fd());
                    fds.push(owned);
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    let truncated = msg.msg_flags & libc::MSG_CTRUNC != 0;
    Ok((n, fds, truncated))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_cloexec(fd: RawFd) {
    // SAFETY: fcntl on a descriptor this process owns
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags >= 0 {
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
}

/// Make `fd` available as [`crate::CONTROL_FD`] in a child about to `exec`.
///
/// Call from `pre_exec` only: it runs after `fork` and uses nothing but
/// async-signal-safe syscalls.
pub fn prepare_child_fd(fd: RawFd) -> io::Result<()> {
    let target = crate::CONTROL_FD;
    // SAFETY: dup2/fcntl are async-signal-safe and act on descriptors the
    // forked child inherited.
    unsafe {
        if fd == target {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                return Err(io::Error::last_os_error());
            }
        } else if libc::dup2(fd, target) < 0 {
            // dup2 leaves the new descriptor without FD_CLOEXEC
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// True if `fd` refers to a socket
pub fn is_socket(fd: RawFd) -> bool {
    // SAFETY: fstat writes into a zeroed stat buffer; a bad fd just fails.
    unsafe {
        let mut stat: libc::stat = std::mem::zeroed();
        libc::fstat(fd, &mut stat) == 0 && (stat.st_mode & libc::S_IFMT) == libc::S_IFSOCK
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_transfer_tcp_stream_unread() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();

        client.write_all(b"first bytes").unwrap();

        let (tx, rx) = UnixStream::pair().unwrap();
        let sent = send_with_fd(tx.as_raw_fd(), b"T", Some(accepted.as_fd())).unwrap();
        assert_eq!(sent, 1);
        drop(accepted);

        let mut buf = [0u8; 16];
        let (n, mut fds, truncated) = recv_with_fds(rx.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(n, 1);
        assert!(!truncated);
        assert_eq!(fds.len(), 1);

        let mut received = TcpStream::from(fds.remove(0));
        let mut got = [0u8; 11];
        received.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"first bytes");

        received.write_all(b"reply").unwrap();
        let mut reply = [0u8; 5];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"reply");
    }

    #[test]
    fn test_plain_send_has_no_fds() {
        let (tx, rx) = UnixStream::pair().unwrap();
        send_with_fd(tx.as_raw_fd(), b"abc", None).unwrap();
        let mut buf = [0u8; 8];
        let (n, fds, _) = recv_with_fds(rx.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(&buf[..n], b"abc");
        assert!(fds.is_empty());
    }

    #[test]
    fn test_recv_would_block_when_empty() {
        let (_tx, rx) = UnixStream::pair().unwrap();
        let mut buf = [0u8; 8];
        let err = recv_with_fds(rx.as_raw_fd(), &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_recv_eof_after_peer_close() {
        let (tx, rx) = UnixStream::pair().unwrap();
        drop(tx);
        let mut buf = [0u8; 8];
        let (n, fds, _) = recv_with_fds(rx.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(n, 0);
        assert!(fds.is_empty());
    }

    #[test]
    fn test_send_to_closed_peer_fails() {
        let (tx, rx) = UnixStream::pair().unwrap();
        drop(rx);
        let err = send_with_fd(tx.as_raw_fd(), b"x", None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_is_socket() {
        let (a, _b) = UnixStream::pair().unwrap();
        assert!(is_socket(a.as_raw_fd()));
        let file = std::fs::File::open("/dev/null").unwrap();
        assert!(!is_socket(file.as_raw_fd()));
    }
}
