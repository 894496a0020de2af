//! In-memory peer reachability table. Not persisted: a restart
//! of the rendezvous node forgets every peer and they simply re-register.

use dashmap::DashMap;
use std::net::IpAddr;
use std::time::Duration;

use pierce_core::{NatType, PeerRecord, TimestampMs};

/// Record eviction fires when no Register heartbeat has arrived for this
/// long, matching the 30 s read-deadline extension clients renew on.
pub const EVICTION_AFTER: Duration = Duration::from_secs(30);

#[derive(Default)]
pub struct Registry {
    peers: DashMap<u64, PeerRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }

    /// Insert or refresh a peer's record on Register, returning the updated
    /// record.
    pub fn upsert(
        &self,
        peer_id: u64,
        public_ip: IpAddr,
        tcp_port: u16,
        udp_port: u16,
        nat_type: NatType,
        exclusive_public_ipv4: bool,
    ) -> PeerRecord {
        let record = PeerRecord {
            peer_id,
            public_ip,
            tcp_port,
            udp_port,
            nat_type,
            exclusive_public_ipv4,
            local_ipv4: None,
            ipv6: None,
            os_tag: None,
            last_seen: TimestampMs::now(),
        };
        self.peers.insert(peer_id, record.clone());
        record
    }

    /// Refresh `last_seen` only, for a heartbeat (empty-body Register).
    pub fn touch(&self, peer_id: u64) -> bool {
        if let Some(mut entry) = self.peers.get_mut(&peer_id) {
            entry.last_seen = TimestampMs::now();
            true
        } else {
            false
        }
    }

    pub fn get(&self, peer_id: u64) -> Option<PeerRecord> {
        self.peers.get(&peer_id).map(|r| r.clone())
    }

    pub fn remove(&self, peer_id: u64) {
        self.peers.remove(&peer_id);
    }

    /// Drop every record whose `last_seen` is older than [`EVICTION_AFTER`].
    /// Called by the server's periodic sweep and also usable directly in
    /// tests.
    pub fn evict_stale(&self) {
        let now = TimestampMs::now().0;
        let cutoff = EVICTION_AFTER.as_millis() as u64;
        self.peers.retain(|_, r| now.saturating_sub(r.last_seen.0) < cutoff);
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_then_get_round_trips() {
        let reg = Registry::new();
        reg.upsert(42, "1.2.3.4".parse().unwrap(), 100, 200, NatType::Cone, true);
        let rec = reg.get(42).expect("present");
        assert_eq!(rec.tcp_port, 100);
        assert_eq!(rec.udp_port, 200);
    }

    #[test]
    fn touch_on_unknown_peer_returns_false() {
        let reg = Registry::new();
        assert!(!reg.touch(999));
    }

    #[test]
    fn remove_drops_the_record() {
        let reg = Registry::new();
        reg.upsert(1, "1.1.1.1".parse().unwrap(), 1, 2, NatType::Unknown, false);
        reg.remove(1);
        assert!(reg.get(1).is_none());
    }
}
