#![forbid(unsafe_code)]

//! Wire-shape mirrors of the records `pierced`'s HTTP surface exchanges.
//!
//! Kept independent of `pierce-core`/`pierce-portmap`/etc: a client of this
//! SDK links against a running daemon over HTTP, not against the daemon's
//! internal crates, so these types only need to agree on JSON shape.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportView {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortmapResourceView {
    pub id: u64,
    pub name: String,
    pub network: TransportView,
    pub target_addr: String,
    pub target_port: u16,
    pub local_ip: Option<String>,
    pub local_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortmapAppView {
    pub id: u64,
    pub name: String,
    pub peer_id: u64,
    pub res_id: u64,
    pub network: TransportView,
    pub local_ip: String,
    pub local_port: u16,
    pub target_addr: Option<String>,
    pub target_port: Option<u16>,
    pub running: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocksOutboundView {
    pub id: u64,
    pub remark: String,
    pub open: bool,
    pub peer: u64,
    pub token: u64,
    pub route_cidr: String,
    pub dns: Option<String>,
    pub peer_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfoView {
    pub program: String,
    pub version: String,
    #[serde(rename = "downloadServer")]
    pub download_server: String,
    #[serde(rename = "downloadPath")]
    pub download_path: String,
    pub checksum: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_view_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TransportView::Tcp).unwrap(), "\"tcp\"");
    }

    #[test]
    fn version_info_view_round_trips_camel_case_fields() {
        let v = VersionInfoView {
            program: "pierce-daemon".into(),
            version: "1.0.0".into(),
            download_server: "http://example.test".into(),
            download_path: "/bin/pierce-daemon".into(),
            checksum: None,
        };
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.contains("\"downloadServer\""));
        let back: VersionInfoView = serde_json::from_str(&json).unwrap();
        assert_eq!(back.version, "1.0.0");
    }
}
