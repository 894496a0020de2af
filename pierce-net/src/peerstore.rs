//! In-memory address book mapping a [`PeerId`] to its last known dial
//! address, consulted before opening a protocol stream to a peer we already
//! hold a tunnel or rendezvous record for. A flat map is all a single-hop,
//! pairwise overlay needs — no multi-hop DHT routing required.

use dashmap::DashMap;
use std::net::SocketAddr;

use pierce_crypto::identity::PeerId;

#[derive(Debug, Default)]
pub struct PeerStore {
    addrs: DashMap<PeerId, SocketAddr>,
}

impl PeerStore {
    pub fn new() -> Self {
        Self {
            addrs: DashMap::new(),
        }
    }

    pub fn insert(&self, peer: PeerId, addr: SocketAddr) {
        self.addrs.insert(peer, addr);
    }

    pub fn get(&self, peer: &PeerId) -> Option<SocketAddr> {
        self.addrs.get(peer).map(|a| *a)
    }

    pub fn remove(&self, peer: &PeerId) {
        self.addrs.remove(peer);
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pierce_crypto::identity::Identity;

    #[test]
    fn insert_then_get_round_trips() {
        let store = PeerStore::new();
        let id = Identity::from_seed(&[5u8; 32]).peer_id();
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        store.insert(id, addr);
        assert_eq!(store.get(&id), Some(addr));
    }

    #[test]
    fn remove_clears_entry() {
        let store = PeerStore::new();
        let id = Identity::from_seed(&[6u8; 32]).peer_id();
        store.insert(id, "127.0.0.1:9001".parse().unwrap());
        store.remove(&id);
        assert!(store.get(&id).is_none());
    }
}
