//! Register/Query wire messages.

use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;

use pierce_core::{NatType, Transport};

pub const REGISTER_APP: u32 = 1;
pub const QUERY_APP: u32 = 2;

/// First message from a new peer. `peer_id = 0` asks the server to assign
/// one; a nonzero, already-known `peer_id` with an empty body that follows
/// is instead treated as a heartbeat.
///
/// Beyond the bare `{peerID, tcpPort, udpPort}`, this also carries the
/// node's self-reported NAT classification and OS tag — fields the tunnel
/// manager needs to pick a punch strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub peer_id: u64,
    pub tcp_port: u16,
    pub udp_port: u16,
    #[serde(default)]
    pub nat_type: NatType,
    #[serde(default)]
    pub exclusive_public_ipv4: bool,
    #[serde(default)]
    pub local_ipv4: Option<std::net::IpAddr>,
    #[serde(default)]
    pub ipv6: Option<Ipv6Addr>,
    #[serde(default)]
    pub os_tag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub peer_id: u64,
    pub extra: Transport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub peer_id: u64,
    pub public_ip: std::net::IpAddr,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub nat_type: pierce_core::NatType,
    pub exclusive_public_ipv4: bool,
    pub extra: Transport,
}
