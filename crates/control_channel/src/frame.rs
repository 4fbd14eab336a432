//! Control frame types and wire encoding.
//!
//! ```text
//! [u8: kind] [u16 LE: payload_len] [payload_bytes]
//! ```
//!
//! Kinds:
//! - `0x01` `Transfer`: UTF-8 peer socket address; the connection descriptor
//!   arrives as SCM_RIGHTS ancillary data in the same `sendmsg()` call
//! - `0x02` `Message`: opaque application bytes
//! - `0x03` `Shutdown`: empty payload
//!
//! A descriptor is attached to the first byte of its `sendmsg()`, so by the
//! time a whole `Transfer` frame has been read its descriptor is already
//! queued. Descriptors are consumed in arrival order.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::os::fd::OwnedFd;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ControlError;

/// Frame header length (kind + length)
pub const HEADER_LEN: usize = 3;

/// Largest payload the length field can describe
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Frame kind discriminants
pub mod frame_kind {
    /// Connection transfer; descriptor in SCM_RIGHTS
    pub const TRANSFER: u8 = 0x01;
    /// Application-defined control message
    pub const MESSAGE: u8 = 0x02;
    /// Stop the worker
    pub const SHUTDOWN: u8 = 0x03;
}

/// Frame sent from the master to a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// A live connection follows as ancillary data
    Transfer { peer: SocketAddr },
    /// Opaque application message
    Message(Bytes),
    /// Worker should stop
    Shutdown,
}

impl ControlFrame {
    /// Discriminant byte
    pub fn kind(&self) -> u8 {
        match self {
            Self::Transfer { .. } => frame_kind::TRANSFER,
            Self::Message(_) => frame_kind::MESSAGE,
            Self::Shutdown => frame_kind::SHUTDOWN,
        }
    }

    /// Encode to wire bytes
    pub fn encode(&self) -> Result<Vec<u8>, ControlError> {
        let peer_text;
        let payload: &[u8] = match self {
            Self::Transfer { peer } => {
                peer_text = peer.to_string();
                peer_text.as_bytes()
            }
            Self::Message(bytes) => bytes,
            Self::Shutdown => &[],
        };

        if payload.len() > MAX_PAYLOAD {
            return Err(ControlError::FrameTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD,
            });
        }

        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.put_u8(self.kind());
        buf.put_u16_le(payload.len() as u16);
        buf.extend_from_slice(payload);
        Ok(buf)
    }
}

/// Frame as received by a worker
#[derive(Debug)]
pub enum Received {
    /// Connection handed over by the master
    Transfer { peer: SocketAddr, fd: OwnedFd },
    /// Opaque application message
    Message(Bytes),
    /// Worker should stop
    Shutdown,
}

/// Incremental decoder for the control stream
///
/// Feed it raw bytes and any descriptors received with them; pull complete
/// frames out with [`FrameDecoder::next_frame`].
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
    fds: VecDeque<OwnedFd>,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes and descriptors
    pub fn feed(&mut self, data: &[u8], fds: impl IntoIterator<Item = OwnedFd>) {
        self.buf.extend_from_slice(data);
        self.fds.extend(fds);
    }

    /// Bytes buffered but not yet decoded
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Descriptors received but not yet claimed by a frame
    pub fn pending_fds(&self) -> usize {
        self.fds.len()
    }

    /// Decode the next complete frame, if any
    pub fn next_frame(&mut self) -> Result<Option<Received>, ControlError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let kind = self.buf[0];
        let len = u16::from_le_bytes([self.buf[1], self.buf[2]]) as usize;
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(len).freeze();

        match kind {
            frame_kind::TRANSFER => {
                let peer = parse_peer(&payload)?;
                let fd = self.fds.pop_front().ok_or_else(|| {
                    ControlError::protocol("transfer frame arrived without a descriptor")
                })?;
                Ok(Some(Received::Transfer { peer, fd }))
            }
            frame_kind::MESSAGE => Ok(Some(Received::Message(payload))),
            frame_kind::SHUTDOWN => Ok(Some(Received::Shutdown)),
            other => Err(ControlError::protocol(format!(
                "unknown frame kind 0x{other:02x}"
            ))),
        }
    }
}

fn parse_peer(payload: &[u8]) -> Result<SocketAddr, ControlError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| ControlError::protocol(format!("peer address is not utf-8: {e}")))?;
    text.parse()
        .map_err(|e| ControlError::protocol(format!("invalid peer address '{text}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    fn some_fd() -> OwnedFd {
        let (a, _b) = std::os::unix::net::UnixStream::pair().unwrap();
        OwnedFd::from(a)
    }

    #[test]
    fn test_encode_layout() {
        let encoded = ControlFrame::Message(Bytes::from_static(b"hi")).encode().unwrap();
        assert_eq!(encoded, vec![frame_kind::MESSAGE, 2, 0, b'h', b'i']);

        let encoded = ControlFrame::Shutdown.encode().unwrap();
        assert_eq!(encoded, vec![frame_kind::SHUTDOWN, 0, 0]);
    }

    #[test]
    fn test_transfer_pairs_with_descriptor() {
        let peer: SocketAddr = "203.0.113.7:51000".parse().unwrap();
        let frame = ControlFrame::Transfer { peer }.encode().unwrap();
        let fd = some_fd();
        let raw = fd.as_raw_fd();

        let mut decoder = FrameDecoder::new();
        decoder.feed(&frame, [fd]);

        match decoder.next_frame().unwrap() {
            Some(Received::Transfer { peer: got, fd }) => {
                assert_eq!(got, peer);
                assert_eq!(fd.as_raw_fd(), raw);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(decoder.pending_fds(), 0);
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_partial_feed() {
        let frame = ControlFrame::Message(Bytes::from_static(b"hello"))
            .encode()
            .unwrap();
        let mut decoder = FrameDecoder::new();

        decoder.feed(&frame[..2], []);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.feed(&frame[2..6], []);
        assert!(decoder.next_frame().unwrap().is_none());
        decoder.feed(&frame[6..], []);

        match decoder.next_frame().unwrap() {
            Some(Received::Message(payload)) => assert_eq!(&payload[..], b"hello"),
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_several_frames_in_one_read() {
        let mut bytes = ControlFrame::Message(Bytes::from_static(b"a"))
            .encode()
            .unwrap();
        bytes.extend(ControlFrame::Shutdown.encode().unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes, []);
        assert!(matches!(
            decoder.next_frame().unwrap(),
            Some(Received::Message(_))
        ));
        assert!(matches!(
            decoder.next_frame().unwrap(),
            Some(Received::Shutdown)
        ));
        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_transfer_without_descriptor_is_error() {
        let peer: SocketAddr = "[2001:db8::1]:443".parse().unwrap();
        let frame = ControlFrame::Transfer { peer }.encode().unwrap();
        let mut decoder = FrameDecoder::new();
        decoder.feed(&frame, []);
        assert!(matches!(
            decoder.next_frame(),
            Err(ControlError::Protocol { .. })
        ));
    }

    #[test]
    fn test_message_never_claims_descriptor() {
        let mut decoder = FrameDecoder::new();
        let message = ControlFrame::Message(Bytes::from_static(b"x"))
            .encode()
            .unwrap();
        decoder.feed(&message, [some_fd()]);
        assert!(matches!(
            decoder.next_frame().unwrap(),
            Some(Received::Message(_))
        ));
        assert_eq!(decoder.pending_fds(), 1);
    }

    #[test]
    fn test_unknown_kind() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[0x7f, 0, 0], []);
        assert!(decoder.next_frame().is_err());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = Bytes::from(vec![0u8; MAX_PAYLOAD + 1]);
        assert!(matches!(
            ControlFrame::Message(payload).encode(),
            Err(ControlError::FrameTooLarge { .. })
        ));
    }
}
