// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transit frame encode/decode and the `TransitProtMsg` message type
//! (spec §3, §6): `{length:u16 LE, message_id:u8, direction:u8, payload_tlv}`.

use std::net::SocketAddr;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::error::CoreError;
use crate::wire::tlv::Payload;

/// Direction byte in the Transit frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    const fn byte(self) -> u8 {
        match self {
            Self::Request => 0x00,
            Self::Response => 0x01,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Request),
            0x01 => Some(Self::Response),
            _ => None,
        }
    }
}

/// A decoded Transit frame header plus payload, independent of any
/// in-flight bookkeeping (deadline/callback — see `TransitProtMsg`).
#[derive(Debug, Clone)]
pub struct TransitFrame {
    pub message_id: u8,
    pub direction: Direction,
    pub payload: Payload,
}

impl TransitFrame {
    pub fn encode(&self) -> Vec<u8> {
        let payload_bytes = self.payload.encode();
        let mut out = Vec::with_capacity(3 + payload_bytes.len());
        // length covers message_id + direction + payload, per the wire format.
        let length = (2 + payload_bytes.len()) as u16;
        out.extend_from_slice(&length.to_le_bytes());
        out.push(self.message_id);
        out.push(self.direction.byte());
        out.extend_from_slice(&payload_bytes);
        out
    }

    /// Attempt to split one complete frame off the front of `buf`, returning
    /// `(frame, consumed_bytes)`. Returns `Ok(None)` if `buf` does not yet
    /// hold a complete frame (the proxy should keep reading).
    pub fn try_decode(buf: &[u8]) -> Result<Option<(Self, usize)>, CoreError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let length = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        let total = 2 + length;
        if buf.len() < total {
            return Ok(None);
        }
        if length < 2 {
            return Err(CoreError::InvalidResponse("frame shorter than header".to_owned()));
        }
        let message_id = buf[2];
        let direction = Direction::from_byte(buf[3])
            .ok_or_else(|| CoreError::InvalidResponse("unknown direction byte".to_owned()))?;
        let payload = Payload::decode(&buf[4..total])?;
        Ok(Some((Self { message_id, direction, payload }, total)))
    }
}

/// A framed Transit message together with its proxy-owned bookkeeping
/// (spec §3: "owned by the proxy's outstanding-request table until either a
/// matched response arrives or the deadline elapses").
pub struct TransitProtMsg {
    pub message_id: u8,
    pub direction: Direction,
    pub payload: Payload,
    pub target: SocketAddr,
    pub deadline: Instant,
    /// Fires with `Some(frame)` on a matched response, `None` on timeout.
    pub reply: Option<oneshot::Sender<Option<TransitFrame>>>,
}

impl TransitProtMsg {
    pub fn new_request(
        message_id: u8,
        payload: Payload,
        target: SocketAddr,
        deadline: Instant,
        reply: oneshot::Sender<Option<TransitFrame>>,
    ) -> Self {
        Self { message_id, direction: Direction::Request, payload, target, deadline, reply: Some(reply) }
    }

    pub fn to_frame(&self) -> TransitFrame {
        TransitFrame { message_id: self.message_id, direction: self.direction, payload: self.payload.clone() }
    }

    /// Deliver a response (or `None` for "no response", i.e. an expiry)
    /// and consume the reply channel. A second call is a silent no-op —
    /// the table removes the entry on first delivery so this should never
    /// happen, but guards the "exactly one callback" invariant defensively.
    pub fn deliver(&mut self, frame: Option<TransitFrame>) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::tags::Command;
    use crate::wire::tlv::PayloadBuilder;

    #[test]
    fn encode_decode_round_trip() {
        let payload = PayloadBuilder::new().command(Command::GetState).build();
        let frame = TransitFrame { message_id: 42, direction: Direction::Request, payload };
        let bytes = frame.encode();
        let (decoded, consumed) = TransitFrame::try_decode(&bytes).expect("decode").expect("complete");
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.message_id, 42);
        assert_eq!(decoded.direction, Direction::Request);
    }

    #[test]
    fn try_decode_returns_none_on_partial_frame() {
        let payload = PayloadBuilder::new().command(Command::GetState).build();
        let frame = TransitFrame { message_id: 1, direction: Direction::Response, payload };
        let bytes = frame.encode();
        let partial = &bytes[..bytes.len() - 1];
        assert!(TransitFrame::try_decode(partial).expect("no error on partial").is_none());
    }

    #[test]
    fn try_decode_handles_trailing_bytes_for_next_frame() {
        let payload = PayloadBuilder::new().command(Command::GetState).build();
        let frame = TransitFrame { message_id: 1, direction: Direction::Response, payload };
        let mut bytes = frame.encode();
        bytes.extend_from_slice(&[0xAA, 0xBB, 0xCC]);
        let (_decoded, consumed) = TransitFrame::try_decode(&bytes).expect("decode").expect("complete");
        assert!(consumed < bytes.len());
    }
}
