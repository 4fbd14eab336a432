//! Connection dispatcher - routes raw connections to worker slots

use std::net::SocketAddr;
use std::os::fd::AsFd;
use std::sync::Arc;
use std::time::Instant;

use contracts::{SlotIndex, TransferPolicy};
use control_channel::ControlError;
use supervisor::SlotLookup;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::metrics::DispatchMetrics;

/// Why a connection could not be handed over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFailure {
    /// The slot has no running worker
    NoWorker,
    /// The worker's control channel is closed
    Closed,
    /// The worker's control channel is full
    WouldBlock,
    /// A partial frame broke the control channel
    PartialWrite,
    /// The stream could not be detached from the runtime
    Detach,
    /// Any other send error
    Io,
}

impl TransferFailure {
    /// Metric label
    pub fn label(self) -> &'static str {
        match self {
            Self::NoWorker => "no_worker",
            Self::Closed => "closed",
            Self::WouldBlock => "would_block",
            Self::PartialWrite => "partial_write",
            Self::Detach => "detach",
            Self::Io => "io",
        }
    }
}

impl From<&ControlError> for TransferFailure {
    fn from(err: &ControlError) -> Self {
        match err {
            ControlError::Closed => Self::Closed,
            ControlError::WouldBlock => Self::WouldBlock,
            ControlError::PartialWrite { .. } => Self::PartialWrite,
            _ => Self::Io,
        }
    }
}

/// What happened to one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handed to the worker in `slot`
    Transferred { slot: SlotIndex },
    /// Parked until `slot` respawns
    Held { slot: SlotIndex },
    /// Closed; the client sees EOF or a reset
    Dropped {
        slot: SlotIndex,
        reason: TransferFailure,
    },
}

#[derive(Debug)]
struct HeldConnection {
    stream: std::net::TcpStream,
    peer: SocketAddr,
    since: Instant,
}

/// Routes accepted connections to worker slots.
///
/// Never reads or writes connection payload: the stream is detached from
/// the runtime, its descriptor is sent to the worker, and the local copy is
/// closed.
#[derive(Debug)]
pub struct Dispatcher {
    policy: TransferPolicy,
    pending: Vec<Option<HeldConnection>>,
    metrics: Arc<DispatchMetrics>,
}

impl Dispatcher {
    /// Create a dispatcher for `slot_count` slots
    pub fn new(slot_count: usize, policy: TransferPolicy) -> Self {
        Self {
            policy,
            pending: (0..slot_count).map(|_| None).collect(),
            metrics: Arc::new(DispatchMetrics::new()),
        }
    }

    /// Shared counters
    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    /// Connections currently parked
    pub fn pending_count(&self) -> usize {
        self.pending.iter().filter(|p| p.is_some()).count()
    }

    /// Route one freshly accepted connection
    pub fn dispatch(
        &mut self,
        stream: TcpStream,
        peer: SocketAddr,
        slots: &impl SlotLookup,
    ) -> DispatchOutcome {
        let slot_count = slots.slot_count();
        if slot_count == 0 {
            self.metrics.inc_dropped();
            debug!(%peer, "no worker slots, dropping connection");
            return DispatchOutcome::Dropped {
                slot: 0,
                reason: TransferFailure::NoWorker,
            };
        }
        if self.pending.len() < slot_count {
            self.pending.resize_with(slot_count, || None);
        }

        let slot = router::route_ip(peer.ip(), slot_count);
        self.metrics.inc_routed();
        observability::record_connection_routed(slot);

        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%peer, slot, error = %e, "failed to detach connection");
                return self.fail(slot, None, TransferFailure::Detach);
            }
        };

        match transfer(&stream, peer, slot, slots) {
            Ok(()) => {
                self.metrics.inc_transferred();
                debug!(%peer, slot, "connection transferred");
                DispatchOutcome::Transferred { slot }
            }
            Err(reason) => self.fail(
                slot,
                Some(HeldConnection {
                    stream,
                    peer,
                    since: Instant::now(),
                }),
                reason,
            ),
        }
    }

    /// A worker came up in `slot`: forward the connection parked for it, if any
    pub fn on_slot_spawned(
        &mut self,
        slot: SlotIndex,
        slots: &impl SlotLookup,
    ) -> Option<DispatchOutcome> {
        let held = self.pending.get_mut(slot)?.take()?;
        self.metrics.set_held(self.pending_count());
        observability::record_connection_held(slot, false);

        let waited_ms = held.since.elapsed().as_millis() as u64;
        match transfer(&held.stream, held.peer, slot, slots) {
            Ok(()) => {
                self.metrics.inc_transferred();
                self.metrics.inc_released();
                info!(peer = %held.peer, slot, waited_ms, "held connection forwarded");
                Some(DispatchOutcome::Transferred { slot })
            }
            Err(reason) => {
                self.metrics.inc_failed();
                self.metrics.inc_dropped();
                observability::record_transfer_failed(slot, reason.label());
                debug!(peer = %held.peer, slot, reason = reason.label(), "held connection dropped");
                Some(DispatchOutcome::Dropped { slot, reason })
            }
        }
    }

    /// Close every parked connection
    pub fn clear_pending(&mut self) -> usize {
        let mut cleared = 0;
        for (slot, entry) in self.pending.iter_mut().enumerate() {
            if entry.take().is_some() {
                cleared += 1;
                observability::record_connection_held(slot, false);
            }
        }
        self.metrics.set_held(0);
        cleared
    }

    fn fail(
        &mut self,
        slot: SlotIndex,
        conn: Option<HeldConnection>,
        reason: TransferFailure,
    ) -> DispatchOutcome {
        self.metrics.inc_failed();
        observability::record_transfer_failed(slot, reason.label());

        if let (TransferPolicy::HoldOne, Some(conn)) = (self.policy, conn) {
            let free = self.pending.get(slot).is_some_and(|p| p.is_none());
            if free {
                debug!(peer = %conn.peer, slot, reason = reason.label(), "transfer failed, holding connection");
                self.pending[slot] = Some(conn);
                self.metrics.set_held(self.pending_count());
                observability::record_connection_held(slot, true);
                return DispatchOutcome::Held { slot };
            }
        }

        self.metrics.inc_dropped();
        debug!(slot, reason = reason.label(), "transfer failed, dropping connection");
        DispatchOutcome::Dropped { slot, reason }
    }
}

fn transfer(
    stream: &std::net::TcpStream,
    peer: SocketAddr,
    slot: SlotIndex,
    slots: &impl SlotLookup,
) -> Result<(), TransferFailure> {
    let control = slots.control(slot).ok_or(TransferFailure::NoWorker)?;
    control
        .transfer(stream.as_fd(), peer)
        .map_err(|e| TransferFailure::from(&e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::SlotState;
    use control_channel::{ControlReceiver, ControlSender, Received};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Slot table stand-in: one control pair per slot, some may be missing
    struct FakeSlots {
        controls: Vec<Option<ControlSender>>,
    }

    impl SlotLookup for FakeSlots {
        fn slot_count(&self) -> usize {
            self.controls.len()
        }

        fn control(&self, slot: SlotIndex) -> Option<&ControlSender> {
            self.controls.get(slot)?.as_ref().filter(|c| !c.is_broken())
        }

        fn state(&self, slot: SlotIndex) -> Option<SlotState> {
            self.controls.get(slot).map(|c| match c {
                Some(_) => SlotState::Running,
                None => SlotState::Exited,
            })
        }
    }

    fn fake_slots(n: usize) -> (FakeSlots, Vec<ControlReceiver>) {
        let mut controls = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..n {
            let (tx, child) = control_channel::pair().unwrap();
            controls.push(Some(tx));
            receivers.push(ControlReceiver::from_std(child).unwrap());
        }
        (FakeSlots { controls }, receivers)
    }

    async fn accept_one(listener: &TcpListener) -> (TcpStream, SocketAddr, TcpStream) {
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (accepted, peer) = listener.accept().await.unwrap();
        (accepted, peer, client)
    }

    #[tokio::test]
    async fn test_dispatch_transfers_to_routed_slot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (slots, mut receivers) = fake_slots(4);
        let mut dispatcher = Dispatcher::new(4, TransferPolicy::Drop);

        let (accepted, peer, mut client) = accept_one(&listener).await;
        client.write_all(b"hello").await.unwrap();

        let expected = router::route_ip(peer.ip(), 4);
        let outcome = dispatcher.dispatch(accepted, peer, &slots);
        assert_eq!(outcome, DispatchOutcome::Transferred { slot: expected });

        let fd = match receivers[expected].recv().await.unwrap() {
            Some(Received::Transfer { peer: got, fd }) => {
                assert_eq!(got, peer);
                fd
            }
            other => panic!("unexpected: {other:?}"),
        };
        let std_stream = std::net::TcpStream::from(fd);
        std_stream.set_nonblocking(true).unwrap();
        let mut forwarded = TcpStream::from_std(std_stream).unwrap();
        let mut buf = [0u8; 5];
        forwarded.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        let snapshot = dispatcher.metrics().snapshot();
        assert_eq!(snapshot.routed, 1);
        assert_eq!(snapshot.transferred, 1);
    }

    #[tokio::test]
    async fn test_same_address_same_slot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (slots, _receivers) = fake_slots(8);
        let mut dispatcher = Dispatcher::new(8, TransferPolicy::Drop);

        let mut seen = Vec::new();
        for _ in 0..5 {
            let (accepted, peer, _client) = accept_one(&listener).await;
            match dispatcher.dispatch(accepted, peer, &slots) {
                DispatchOutcome::Transferred { slot } => seen.push(slot),
                other => panic!("unexpected: {other:?}"),
            }
        }
        assert!(seen.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_missing_worker_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let slots = FakeSlots {
            controls: vec![None],
        };
        let mut dispatcher = Dispatcher::new(1, TransferPolicy::Drop);

        let (accepted, peer, mut client) = accept_one(&listener).await;
        let outcome = dispatcher.dispatch(accepted, peer, &slots);
        assert_eq!(
            outcome,
            DispatchOutcome::Dropped {
                slot: 0,
                reason: TransferFailure::NoWorker
            }
        );

        // Local descriptor closed: the client reads EOF (or a reset)
        let mut buf = [0u8; 1];
        let read = client.read(&mut buf).await;
        assert!(matches!(read, Ok(0) | Err(_)));
        assert_eq!(dispatcher.metrics().snapshot().dropped, 1);
    }

    #[tokio::test]
    async fn test_closed_control_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (slots, receivers) = fake_slots(1);
        drop(receivers);
        let mut dispatcher = Dispatcher::new(1, TransferPolicy::Drop);

        let (accepted, peer, mut client) = accept_one(&listener).await;
        let outcome = dispatcher.dispatch(accepted, peer, &slots);
        assert_eq!(
            outcome,
            DispatchOutcome::Dropped {
                slot: 0,
                reason: TransferFailure::Closed
            }
        );

        let mut buf = [0u8; 1];
        assert!(matches!(client.read(&mut buf).await, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn test_hold_one_forwards_after_respawn() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut slots = FakeSlots {
            controls: vec![None],
        };
        let mut dispatcher = Dispatcher::new(1, TransferPolicy::HoldOne);

        let (first, peer, mut client) = accept_one(&listener).await;
        client.write_all(b"early").await.unwrap();
        assert_eq!(
            dispatcher.dispatch(first, peer, &slots),
            DispatchOutcome::Held { slot: 0 }
        );

        // Only one connection is held per slot
        let (second, peer2, _client2) = accept_one(&listener).await;
        assert!(matches!(
            dispatcher.dispatch(second, peer2, &slots),
            DispatchOutcome::Dropped { slot: 0, .. }
        ));
        assert_eq!(dispatcher.pending_count(), 1);

        // Worker comes back
        let (tx, child) = control_channel::pair().unwrap();
        let mut rx = ControlReceiver::from_std(child).unwrap();
        slots.controls[0] = Some(tx);

        assert_eq!(
            dispatcher.on_slot_spawned(0, &slots),
            Some(DispatchOutcome::Transferred { slot: 0 })
        );
        assert_eq!(dispatcher.pending_count(), 0);
        assert!(dispatcher.on_slot_spawned(0, &slots).is_none());

        let fd = match rx.recv().await.unwrap() {
            Some(Received::Transfer { fd, .. }) => fd,
            other => panic!("unexpected: {other:?}"),
        };
        let std_stream = std::net::TcpStream::from(fd);
        std_stream.set_nonblocking(true).unwrap();
        let mut forwarded = TcpStream::from_std(std_stream).unwrap();
        let mut buf = [0u8; 5];
        forwarded.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"early");

        let snapshot = dispatcher.metrics().snapshot();
        assert_eq!(snapshot.released, 1);
        assert_eq!(snapshot.held, 0);
    }

    #[tokio::test]
    async fn test_clear_pending() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let slots = FakeSlots {
            controls: vec![None, None],
        };
        let mut dispatcher = Dispatcher::new(2, TransferPolicy::HoldOne);

        let (accepted, peer, _client) = accept_one(&listener).await;
        assert!(matches!(
            dispatcher.dispatch(accepted, peer, &slots),
            DispatchOutcome::Held { .. }
        ));
        assert_eq!(dispatcher.clear_pending(), 1);
        assert_eq!(dispatcher.pending_count(), 0);
    }
}
