//! The framed packet carried over any tunnel: `from: u64 | to: u64 |
//! len: u32 | payload[len]`, little-endian throughout.

use bytes::Bytes;

use crate::errors::{Error, Result};

/// Packets over 64 MiB close the tunnel rather than being parsed.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// Peer id `0` is reserved for tunnel-internal control packets.
pub const CONTROL_DEST: u64 = 0;

pub const HEADER_LEN: usize = 8 + 8 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub from: u64,
    pub to: u64,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(from: u64, to: u64, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::TooLarge {
                max: MAX_PAYLOAD_LEN,
                got: payload.len(),
            });
        }
        Ok(Self { from, to, payload })
    }

    pub fn is_control(&self) -> bool {
        self.to == CONTROL_DEST
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

/// Tunnel-internal control opcodes carried in the first 4 bytes of a control
/// packet's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOpcode {
    Heartbeat,
    HeartbeatAck,
}

impl ControlOpcode {
    pub fn code(self) -> u32 {
        match self {
            ControlOpcode::Heartbeat => 1,
            ControlOpcode::HeartbeatAck => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(ControlOpcode::Heartbeat),
            2 => Some(ControlOpcode::HeartbeatAck),
            _ => None,
        }
    }
}

impl Frame {
    /// Build a control frame (`to = 0`) carrying just an opcode, with no
    /// further payload (heartbeat replies are empty control packets).
    pub fn control(from: u64, opcode: ControlOpcode) -> Self {
        let mut buf = bytes::BytesMut::with_capacity(4);
        buf.extend_from_slice(&opcode.code().to_le_bytes());
        Self {
            from,
            to: CONTROL_DEST,
            payload: buf.freeze(),
        }
    }

    /// Parse this frame's payload as a control opcode. Only meaningful when
    /// [`Frame::is_control`] is true.
    pub fn control_opcode(&self) -> Result<Option<ControlOpcode>> {
        if self.payload.len() < 4 {
            return Err(Error::MissingOpcode);
        }
        let code = u32::from_le_bytes(self.payload[..4].try_into().expect("checked len"));
        Ok(ControlOpcode::from_code(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_frame_round_trips_opcode() {
        let f = Frame::control(7, ControlOpcode::Heartbeat);
        assert!(f.is_control());
        assert_eq!(f.control_opcode().unwrap(), Some(ControlOpcode::Heartbeat));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let big = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(Frame::new(1, 2, big).is_err());
    }

    #[test]
    fn max_sized_payload_is_accepted() {
        let max = vec![0u8; MAX_PAYLOAD_LEN];
        assert!(Frame::new(1, 2, max).is_ok());
    }
}
