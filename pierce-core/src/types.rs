use serde::{Deserialize, Serialize};
use std::{
    fmt,
    net::{IpAddr, Ipv6Addr},
    time::{SystemTime, UNIX_EPOCH},
};

/// Millisecond-precision wall clock timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimestampMs(pub u64);

impl TimestampMs {
    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(now.as_millis() as u64)
    }
}

impl fmt::Display for TimestampMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic nanosecond timestamp, used for add-tunnel races and latency math.
/// Always derived from `Instant`, never wall-clock, so it is safe to compare
/// across the add-judger.
pub fn now_ns() -> i64 {
    static START: once_cell::sync::Lazy<std::time::Instant> =
        once_cell::sync::Lazy::new(std::time::Instant::now);
    START.elapsed().as_nanos() as i64
}

/// NAT classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NatType {
    Cone,
    Symmetric,
    Unknown,
}

impl Default for NatType {
    fn default() -> Self {
        NatType::Unknown
    }
}

impl fmt::Display for NatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NatType::Cone => "cone",
            NatType::Symmetric => "symmetric",
            NatType::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Peer reachability record held by the rendezvous service.
///
/// Not persisted across rendezvous restart: created on registration,
/// refreshed on heartbeat, evicted on disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: u64,
    pub public_ip: IpAddr,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub nat_type: NatType,
    pub exclusive_public_ipv4: bool,
    pub local_ipv4: Option<IpAddr>,
    pub ipv6: Option<Ipv6Addr>,
    pub os_tag: Option<String>,
    pub last_seen: TimestampMs,
}

/// Transport tag exchanged in rendezvous Query requests/responses, carried
/// as a proper tagged variant rather than an untyped payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Udp => write!(f, "udp"),
        }
    }
}

/// The sentinel portmap resource id that puts an agent's `AddApp` request
/// into "trial" mode: the agent supplies its own target in the handshake
/// rather than referencing a resource the gateway owns.
pub const TRIAL_RESOURCE_ID: u64 = 666_666;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_is_monotone_nondecreasing_across_calls() {
        let a = TimestampMs::now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = TimestampMs::now();
        assert!(b >= a);
    }

    #[test]
    fn now_ns_increases() {
        let a = now_ns();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = now_ns();
        assert!(b > a);
    }

    #[test]
    fn nat_type_display() {
        assert_eq!(NatType::Cone.to_string(), "cone");
        assert_eq!(NatType::Symmetric.to_string(), "symmetric");
        assert_eq!(NatType::Unknown.to_string(), "unknown");
    }
}
