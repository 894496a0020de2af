#![forbid(unsafe_code)]

//! The framed packet codec: `from: u64 | to: u64 | len: u32 | payload[len]`,
//! little-endian, with an optional per-datagram `check: u32` token for UDP
//! tunnels.

pub mod app;
pub mod codec;
pub mod errors;
pub mod frame;

pub use app::{AppEnvelope, APP_HEADER_LEN};
pub use codec::{decode_udp_datagram, encode_udp_datagram, FrameCodec};
pub use errors::{Error, Result};
pub use frame::{ControlOpcode, Frame, CONTROL_DEST, MAX_PAYLOAD_LEN};
