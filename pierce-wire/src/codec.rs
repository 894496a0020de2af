//! Streaming `tokio_util::codec` implementation for TCP tunnels, plus
//! one-shot encode/decode helpers for UDP datagrams.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::errors::{Error, Result};
use crate::frame::{Frame, HEADER_LEN, MAX_PAYLOAD_LEN};

/// Length-prefixed framing for a reliable byte stream (TCP tunnels).
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(frame.encoded_len());
        dst.put_u64_le(frame.from);
        dst.put_u64_le(frame.to);
        dst.put_u32_le(frame.payload.len() as u32);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header = &src[..HEADER_LEN];
        let from = header.get_u64_le();
        let to = header.get_u64_le();
        let len = header.get_u32_le() as usize;
        if len > MAX_PAYLOAD_LEN {
            return Err(Error::TooLarge {
                max: MAX_PAYLOAD_LEN,
                got: len,
            });
        }
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame { from, to, payload }))
    }
}

/// Encode a frame as a UDP datagram, prefixing the tunnel's expected remote
/// receive token — every send includes the token the remote side expects.
pub fn encode_udp_datagram(frame: &Frame, send_check: u32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4 + frame.encoded_len());
    buf.put_u32_le(send_check);
    buf.put_u64_le(frame.from);
    buf.put_u64_le(frame.to);
    buf.put_u32_le(frame.payload.len() as u32);
    buf.extend_from_slice(&frame.payload);
    buf
}

/// Decode a UDP datagram. Returns `Ok(None)` when the check token does not
/// match `expected_check` — packets with a mismatched token are dropped
/// silently rather than erroring, so callers don't have to special-case it.
pub fn decode_udp_datagram(data: &[u8], expected_check: u32) -> Result<Option<Frame>> {
    if data.len() < 4 {
        return Err(Error::TooShort {
            need: 4,
            got: data.len(),
        });
    }
    let check = u32::from_le_bytes(data[..4].try_into().expect("checked len"));
    if check != expected_check {
        return Ok(None);
    }
    let body = &data[4..];
    if body.len() < HEADER_LEN {
        return Err(Error::TooShort {
            need: HEADER_LEN,
            got: body.len(),
        });
    }
    let from = u64::from_le_bytes(body[0..8].try_into().expect("checked len"));
    let to = u64::from_le_bytes(body[8..16].try_into().expect("checked len"));
    let len = u32::from_le_bytes(body[16..20].try_into().expect("checked len")) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Err(Error::TooLarge {
            max: MAX_PAYLOAD_LEN,
            got: len,
        });
    }
    let payload = &body[HEADER_LEN..];
    if payload.len() != len {
        return Err(Error::LengthMismatch {
            declared: len as u32,
            actual: payload.len(),
        });
    }
    Ok(Some(Frame {
        from,
        to,
        payload: Bytes::copy_from_slice(payload),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    #[test]
    fn tcp_codec_round_trips() {
        let frame = Frame::new(1, 2, &b"hello"[..]).unwrap();
        let mut buf = BytesMut::new();
        let mut codec = FrameCodec;
        codec.encode(frame.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn tcp_codec_waits_for_more_bytes() {
        let frame = Frame::new(1, 2, &b"hello world"[..]).unwrap();
        let mut full = BytesMut::new();
        FrameCodec.encode(frame.clone(), &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(FrameCodec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[full.len() - 1..]);
        let decoded = FrameCodec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn tcp_codec_rejects_oversized_declared_length() {
        let mut buf = BytesMut::new();
        buf.put_u64_le(1);
        buf.put_u64_le(2);
        buf.put_u32_le((MAX_PAYLOAD_LEN + 1) as u32);
        assert!(FrameCodec.decode(&mut buf).is_err());
    }

    #[test]
    fn udp_round_trips_with_matching_check() {
        let frame = Frame::new(1, 2, &b"udp payload"[..]).unwrap();
        let datagram = encode_udp_datagram(&frame, 0xdead_beef);
        let decoded = decode_udp_datagram(&datagram, 0xdead_beef).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn udp_drops_silently_on_check_mismatch() {
        let frame = Frame::new(1, 2, &b"udp payload"[..]).unwrap();
        let datagram = encode_udp_datagram(&frame, 0xdead_beef);
        let decoded = decode_udp_datagram(&datagram, 0x1234_5678).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn udp_rejects_length_mismatch() {
        let frame = Frame::new(1, 2, &b"udp payload"[..]).unwrap();
        let mut datagram = encode_udp_datagram(&frame, 1);
        // Corrupt the declared length field (bytes 16..20 of the body, offset by the 4-byte check).
        let len_offset = 4 + 16;
        datagram[len_offset] = 0xff;
        assert!(decode_udp_datagram(&datagram, 1).is_err());
    }

    proptest::proptest! {
        #[test]
        fn tcp_codec_round_trips_arbitrary_frames(
            from: u64,
            to: u64,
            payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..4096),
        ) {
            let frame = Frame::new(from, to, payload).unwrap();
            let mut buf = BytesMut::new();
            FrameCodec.encode(frame.clone(), &mut buf).unwrap();
            let decoded = FrameCodec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded, frame);
            assert!(buf.is_empty());
        }

        #[test]
        fn udp_round_trips_arbitrary_frames(
            from: u64,
            to: u64,
            payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..4096),
            check: u32,
        ) {
            let frame = Frame::new(from, to, payload).unwrap();
            let datagram = encode_udp_datagram(&frame, check);
            let decoded = decode_udp_datagram(&datagram, check).unwrap().unwrap();
            assert_eq!(decoded, frame);
        }

        #[test]
        fn tcp_codec_never_panics_on_arbitrary_bytes(bytes in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..512)) {
            let mut buf = BytesMut::from(&bytes[..]);
            let _ = FrameCodec.decode(&mut buf);
        }
    }
}
