//! Loopback application server
//!
//! Accepts natively on a loopback listener and also yields connections
//! injected by the control loop. Both come out of [`LocalServer::accept`]
//! looking the same apart from their [`Origin`].

use std::net::SocketAddr;
use std::os::fd::OwnedFd;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use crate::error::WorkerError;

/// How a connection reached this worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Accepted on the local listener
    Native,
    /// Handed over by the master
    Forwarded,
}

/// A connection ready to be served
#[derive(Debug)]
pub struct Incoming {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub origin: Origin,
}

/// Feeds forwarded connections into a [`LocalServer`]
#[derive(Debug, Clone)]
pub struct Injector {
    tx: mpsc::UnboundedSender<Incoming>,
}

impl Injector {
    /// Queue an already-registered stream
    pub fn inject(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), WorkerError> {
        self.tx
            .send(Incoming {
                stream,
                peer,
                origin: Origin::Forwarded,
            })
            .map_err(|_| WorkerError::ServerClosed)
    }

    /// Rebuild a TCP stream from a transferred descriptor and queue it.
    ///
    /// The descriptor arrives untouched. `O_NONBLOCK` lives on the shared open
    /// file description, so it is usually already set by the dispatcher's
    /// runtime; it is set again before registering with this runtime.
    pub fn inject_fd(&self, fd: OwnedFd, peer: SocketAddr) -> Result<(), WorkerError> {
        let stream = std::net::TcpStream::from(fd);
        stream.set_nonblocking(true)?;
        let stream = TcpStream::from_std(stream)?;
        self.inject(stream, peer)
    }
}

/// Loopback listener plus injected-connection queue
#[derive(Debug)]
pub struct LocalServer {
    listener: TcpListener,
    injected: mpsc::UnboundedReceiver<Incoming>,
    injector: Injector,
}

impl LocalServer {
    /// Bind on `addr` (normally loopback, port 0)
    #[instrument(name = "local_server_bind")]
    pub async fn bind(addr: SocketAddr) -> Result<Self, WorkerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| WorkerError::bind(addr, e))?;
        let (tx, injected) = mpsc::unbounded_channel();
        info!(addr = %listener.local_addr()?, "local server listening");

        Ok(Self {
            listener,
            injected,
            injector: Injector { tx },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for queueing forwarded connections
    pub fn injector(&self) -> Injector {
        self.injector.clone()
    }

    /// Next connection, native or forwarded. Cancel-safe.
    pub async fn accept(&mut self) -> Result<Incoming, WorkerError> {
        tokio::select! {
            accepted = self.listener.accept() => {
                let (stream, peer) = accepted?;
                debug!(%peer, "native accept");
                Ok(Incoming { stream, peer, origin: Origin::Native })
            }
            // Never closes: the server holds a sender itself
            Some(incoming) = self.injected.recv() => Ok(incoming),
        }
    }
}
