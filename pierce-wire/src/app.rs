//! The inner `fromApp: u32 | toApp: u32 | data…` header carried inside a
//! [`crate::Frame`] payload, used by any component that multiplexes several
//! logical applications over one tunnel: the rendezvous node's Register/Query
//! app-ids and the per-tunnel dispatcher's registered handlers and mailboxes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::{Error, Result};

pub const APP_HEADER_LEN: usize = 4 + 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEnvelope {
    pub from_app: u32,
    pub to_app: u32,
    pub data: Bytes,
}

impl AppEnvelope {
    pub fn new(from_app: u32, to_app: u32, data: impl Into<Bytes>) -> Self {
        Self {
            from_app,
            to_app,
            data: data.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(APP_HEADER_LEN + self.data.len());
        buf.put_u32_le(self.from_app);
        buf.put_u32_le(self.to_app);
        buf.extend_from_slice(&self.data);
        buf.freeze()
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() < APP_HEADER_LEN {
            return Err(Error::TooShort {
                need: APP_HEADER_LEN,
                got: bytes.len(),
            });
        }
        let from_app = bytes.get_u32_le();
        let to_app = bytes.get_u32_le();
        let data = Bytes::copy_from_slice(bytes);
        Ok(Self {
            from_app,
            to_app,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_envelope_round_trips() {
        let env = AppEnvelope::new(1, 2, &b"payload"[..]);
        let encoded = env.encode();
        let decoded = AppEnvelope::decode(&encoded).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn app_envelope_rejects_short_input() {
        assert!(AppEnvelope::decode(&[0u8; 4]).is_err());
    }
}
