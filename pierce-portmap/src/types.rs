//! Resource/app records persisted under the `portmap_resources` and
//! `portmap_apps` keys.

use pierce_core::Transport;
use serde::{Deserialize, Serialize};

/// A target a gateway is willing to relay connections to.
///
/// Invariants: `id != 0`, `0 < target_port <= 65535`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortmapResource {
    pub id: u64,
    pub name: String,
    pub network: Transport,
    pub target_addr: String,
    pub target_port: u16,
    pub local_ip: Option<String>,
    pub local_port: Option<u16>,
}

impl PortmapResource {
    pub fn validate(&self) -> Result<(), String> {
        if self.id == 0 {
            return Err("resource id must not be zero".into());
        }
        if self.target_port == 0 {
            return Err("target_port must be in 1..=65535".into());
        }
        Ok(())
    }
}

/// An agent-side listener bound to a peer and (usually) one of the peer's
/// resources. A `res_id` of [`pierce_core::TRIAL_RESOURCE_ID`] lets the app
/// carry its own target in the handshake instead of naming a gateway
/// resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortmapApp {
    pub id: u64,
    pub name: String,
    pub peer_id: u64,
    pub res_id: u64,
    pub network: Transport,
    pub local_ip: String,
    pub local_port: u16,
    pub target_addr: Option<String>,
    pub target_port: Option<u16>,
    pub running: bool,
    pub last_error: Option<String>,
}

impl PortmapApp {
    pub fn is_trial(&self) -> bool {
        self.res_id == pierce_core::TRIAL_RESOURCE_ID
    }
}

/// Handshake a listener sends when it opens a `/portmap/1.0.0` stream
/// to the gateway peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortmapHandshake {
    pub res_id: u64,
    pub network: Transport,
    pub target_addr: String,
    pub target_port: u16,
}

/// Reply to a [`PortmapHandshake`]; `code == 0` is success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub code: i32,
    pub msg: String,
}

impl HandshakeResponse {
    pub fn ok() -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            code: 1,
            msg: msg.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_id_resource_is_invalid() {
        let res = PortmapResource {
            id: 0,
            name: "x".into(),
            network: Transport::Tcp,
            target_addr: "127.0.0.1".into(),
            target_port: 80,
            local_ip: None,
            local_port: None,
        };
        assert!(res.validate().is_err());
    }

    #[test]
    fn trial_app_is_detected_by_sentinel_id() {
        let app = PortmapApp {
            id: 1,
            name: "a".into(),
            peer_id: 9,
            res_id: pierce_core::TRIAL_RESOURCE_ID,
            network: Transport::Tcp,
            local_ip: "127.0.0.1".into(),
            local_port: 0,
            target_addr: Some("example.org".into()),
            target_port: Some(80),
            running: true,
            last_error: None,
        };
        assert!(app.is_trial());
    }

    #[test]
    fn handshake_response_round_trips_through_json() {
        let rsp = HandshakeResponse::error("boom");
        let body = serde_json::to_vec(&rsp).unwrap();
        let back: HandshakeResponse = serde_json::from_slice(&body).unwrap();
        assert!(!back.is_ok());
        assert_eq!(back.msg, "boom");
    }
}
