//! Username/password authentication: an `AuthFunc` hook plus a per-peer
//! session cache that lets a gateway skip re-running auth for a connection
//! it has already seen recently.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use pierce_crypto::identity::PeerId;

/// Checks a `(username, token)` pair presented during SOCKS5 sub-negotiation.
/// The token is always the 8-byte little-endian `u64` from
/// [`crate::protocol::UserPassRequest`].
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, username: &[u8], token: u64) -> bool;
}

/// Accepts anything. Used for the trial resource path (spec's
/// `TRIAL_RESOURCE_ID`) and for local-only deployments with no access
/// control configured.
pub struct TrialAuthenticator;

#[async_trait]
impl Authenticator for TrialAuthenticator {
    async fn authenticate(&self, _username: &[u8], _token: u64) -> bool {
        true
    }
}

/// Accepts only the configured token, regardless of username.
pub struct TokenAuthenticator {
    expected: u64,
}

impl TokenAuthenticator {
    pub fn new(expected: u64) -> Self {
        Self { expected }
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, _username: &[u8], token: u64) -> bool {
        token == self.expected
    }
}

/// Remembers recently-authenticated peers so a gateway relaying many short
/// CONNECT-UDP/PACKET-CONN flows from the same overlay peer does not re-run
/// the sub-negotiation on every single one.
pub struct SessionCache {
    ttl: Duration,
    seen: DashMap<PeerId, Instant>,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            seen: DashMap::new(),
        }
    }

    /// Returns `true` if `peer` authenticated within the cache's TTL.
    pub fn is_fresh(&self, peer: &PeerId) -> bool {
        match self.seen.get(peer) {
            Some(at) => at.elapsed() < self.ttl,
            None => false,
        }
    }

    pub fn mark(&self, peer: PeerId) {
        self.seen.insert(peer, Instant::now());
    }

    pub fn evict(&self, peer: &PeerId) {
        self.seen.remove(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pierce_crypto::identity::Identity;

    fn peer(seed: u8) -> PeerId {
        Identity::from_seed(&[seed; 32]).peer_id()
    }

    #[tokio::test]
    async fn trial_authenticator_accepts_anything() {
        let auth = TrialAuthenticator;
        assert!(auth.authenticate(b"whoever", 0).await);
    }

    #[tokio::test]
    async fn token_authenticator_rejects_the_wrong_token() {
        let auth = TokenAuthenticator::new(42);
        assert!(auth.authenticate(b"anyone", 42).await);
        assert!(!auth.authenticate(b"anyone", 41).await);
    }

    #[test]
    fn session_cache_expires_after_ttl() {
        let cache = SessionCache::new(Duration::from_millis(0));
        let p = peer(1);
        cache.mark(p);
        // TTL of zero: elapsed() is never < 0, so this is immediately stale.
        assert!(!cache.is_fresh(&p));
    }

    #[test]
    fn session_cache_is_fresh_within_ttl() {
        let cache = SessionCache::new(Duration::from_secs(60));
        let p = peer(2);
        cache.mark(p);
        assert!(cache.is_fresh(&p));
    }

    #[test]
    fn unseen_peer_is_not_fresh() {
        let cache = SessionCache::new(Duration::from_secs(60));
        assert!(!cache.is_fresh(&peer(3)));
    }

    #[test]
    fn evict_removes_a_cached_peer() {
        let cache = SessionCache::new(Duration::from_secs(60));
        let p = peer(4);
        cache.mark(p);
        cache.evict(&p);
        assert!(!cache.is_fresh(&p));
    }
}
