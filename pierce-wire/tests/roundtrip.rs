use bytes::BytesMut;
use pierce_wire::codec::{decode_udp_datagram, encode_udp_datagram, FrameCodec};
use pierce_wire::frame::Frame;
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

proptest! {
    #[test]
    fn tcp_frame_round_trips(from: u64, to: u64, payload in proptest::collection::vec(any::<u8>(), 0..2048), check: u32) {
        let _ = check;
        let frame = Frame::new(from, to, payload).unwrap();
        let mut buf = BytesMut::new();
        FrameCodec.encode(frame.clone(), &mut buf).unwrap();
        let decoded = FrameCodec.decode(&mut buf).unwrap().unwrap();
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn udp_frame_round_trips(from: u64, to: u64, payload in proptest::collection::vec(any::<u8>(), 0..2048), check: u32) {
        let frame = Frame::new(from, to, payload).unwrap();
        let datagram = encode_udp_datagram(&frame, check);
        let decoded = decode_udp_datagram(&datagram, check).unwrap().unwrap();
        prop_assert_eq!(decoded, frame);
    }
}
