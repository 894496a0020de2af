//! Bridges the rendezvous-assigned `u64` wire id (carried in every framed
//! packet and every `PortmapApp`/`SocksOutbound` record) to the cryptographic
//! `PeerId` the transport host and authorization protocol address peers by.
//!
//! A wire id's `PeerId` is only ever learned by actually dialing the peer —
//! the transport handshake is what produces it (`Host::dial` returns the
//! remote's `remote_peer_id` and records its address in the host's
//! [`pierce_net::Host::peers`] store as a side effect). So resolution here
//! is "dial once via the resource-authorize protocol to learn who answers,
//! then remember it."

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use pierce_core::{Error, Result, Transport};
use pierce_crypto::identity::PeerId;
use pierce_net::{Host, ProtocolId};
use pierce_rendezvous::RendezvousClient;

pub struct PeerRegistry {
    host: Arc<Host>,
    rendezvous: Arc<RendezvousClient>,
    by_wire_id: DashMap<u64, PeerId>,
}

impl PeerRegistry {
    pub fn new(host: Arc<Host>, rendezvous: Arc<RendezvousClient>) -> Self {
        Self {
            host,
            rendezvous,
            by_wire_id: DashMap::new(),
        }
    }

    /// Remember a mapping learned elsewhere (e.g. an inbound handshake that
    /// already carried both ids).
    pub fn remember(&self, wire_id: u64, peer_id: PeerId) {
        self.by_wire_id.insert(wire_id, peer_id);
    }

    pub fn cached(&self, wire_id: u64) -> Option<PeerId> {
        self.by_wire_id.get(&wire_id).map(|e| *e)
    }

    /// Resolve `wire_id` to a [`PeerId`], dialing the peer once over
    /// `/resource/authorize/1.0.0` if it has not been seen yet. The
    /// dial itself is what populates `Host`'s peer-address book, so every
    /// later lookup against that `PeerId` (portmap's `add_listener`, the
    /// socks5 `SocksDialer`) succeeds without re-resolving.
    pub async fn resolve(self: &Arc<Self>, wire_id: u64) -> Result<PeerId> {
        if let Some(cached) = self.cached(wire_id) {
            if self.host.peers().get(&cached).is_some() {
                return Ok(cached);
            }
        }

        let record = self
            .rendezvous
            .query(wire_id, Transport::Tcp)
            .await
            .map_err(|e| Error::ResolveFailed(e.to_string()))?;
        let addr = SocketAddr::new(record.public_ip, record.tcp_port);

        let stream = self
            .host
            .dial(addr, ProtocolId::new(pierce_net::protocol::RESOURCE_AUTHORIZE))
            .await
            .map_err(|e| Error::ResolveFailed(e.to_string()))?;
        let peer_id = stream.remote_peer_id;
        self.by_wire_id.insert(wire_id, peer_id);
        Ok(peer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remember_then_cached_round_trips() {
        let host = Arc::new(Host::new(ed25519_dalek::SigningKey::from_bytes(&[1u8; 32])));
        let rendezvous = Arc::new(
            RendezvousClient::connect("127.0.0.1:39999".parse().unwrap())
                .await
                .unwrap(),
        );
        let registry = Arc::new(PeerRegistry::new(host.clone(), rendezvous));
        let peer_id = host.local_peer_id();
        assert!(registry.cached(7).is_none());
        registry.remember(7, peer_id);
        assert_eq!(registry.cached(7), Some(peer_id));
    }
}
