#![forbid(unsafe_code)]

//! Multiplexed authenticated transport host.
//!
//! Every connection starts with a cleartext protocol-id preamble so the
//! listener can route to the right [`host::StreamHandler`] before spending
//! any cycles on the handshake, followed by a signed X25519 key exchange
//! (see [`handshake`]) that yields a pair of directional AEAD sessions
//! wrapped by [`stream::NetStream`].

pub mod errors;
pub mod handshake;
pub mod host;
pub mod peerstore;
pub mod protocol;
pub mod stream;

pub use errors::{Error, Result};
pub use handshake::HandshakeOutput;
pub use host::{Host, StreamHandler};
pub use peerstore::PeerStore;
pub use protocol::ProtocolId;
pub use stream::NetStream;
