//! Named stream protocol identifiers negotiated in the connection preamble
//! used by the port-map, authorization, and SOCKS5 control protocols.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolId(String);

impl ProtocolId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProtocolId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Port-mapping setup/teardown between a resource owner and a gateway.
pub const PORTMAP: &str = "/portmap/1.0.0";

/// Resource authorization handshake a gateway runs before relaying traffic
/// for an app.
pub const RESOURCE_AUTHORIZE: &str = "/resource/authorize/1.0.0";

/// SOCKS5-over-overlay control channel, including the CONNECT-UDP and
/// PACKET-CONN extensions.
pub const SOCKS5: &str = "/socks5/1.0.0";

/// Carries a single [`pierce_core::PeerRecord`] heartbeat/announce, used by
/// peers that keep a direct (non-rendezvous) link warm.
pub const PEER_ANNOUNCE: &str = "/pierce/peer-announce/1.0.0";
