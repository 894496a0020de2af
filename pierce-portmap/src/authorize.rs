//! Resource authorization protocol: deciding whether a portmap resource or
//! proxy token grants access, via one tagged `type: 1|2` request/response
//! carried over a single stream protocol. `AuthTransport` is a hook point
//! for an alternate transport (e.g. MQTT) to carry the same request/response
//! pair without redesigning the decision logic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use pierce_crypto::identity::PeerId;
use pierce_net::{Host, NetStream, ProtocolId};

use crate::errors::{Error, Result};
use crate::store::ResourceStore;

pub const DEADLINE: Duration = Duration::from_secs(10);

/// `type` tag on the wire: `1` is a portmap authorization, `2` a proxy-token
/// authorization. The request carries a plain integer, not a named tag, so
/// we keep the wire type a bare `u8` and expose these as the two values it
/// may take.
pub type RequestKind = u8;
pub const REQUEST_KIND_PORTMAP: RequestKind = 1;
pub const REQUEST_KIND_PROXY: RequestKind = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortmapAuthorizeReq {
    #[serde(rename = "resourceID")]
    pub resource_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyAuthorizeReq {
    pub token: u64,
    pub route: String,
    pub dns: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub portmap: Option<PortmapAuthorizeReq>,
    pub proxy: Option<ProxyAuthorizeReq>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortmapAuthorizeResp {
    #[serde(rename = "isTrial")]
    pub is_trial: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyAuthorizeResp {
    pub route: String,
    pub dns: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    #[serde(rename = "nodeName")]
    pub node_name: String,
    pub err: Option<String>,
    pub portmap: Option<PortmapAuthorizeResp>,
    pub proxy: Option<ProxyAuthorizeResp>,
}

impl AuthorizeResponse {
    pub fn is_ok(&self) -> bool {
        self.err.is_none()
    }
}

const DEFAULT_ROUTE: &str = "0.0.0.0/0";
const DEFAULT_DNS: &str = "8.8.8.8";

/// Gateway-side authorization state: trial mode, the stored proxy token, and
/// the resource store consulted for non-trial portmap requests.
pub struct Authorizer {
    node_name: String,
    trial: bool,
    proxy_token: u64,
    resources: std::sync::Arc<ResourceStore>,
}

impl Authorizer {
    pub fn new(
        node_name: impl Into<String>,
        trial: bool,
        proxy_token: u64,
        resources: std::sync::Arc<ResourceStore>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            trial,
            proxy_token,
            resources,
        }
    }

    /// Evaluate a request and produce a response.
    /// Always returns a response; callers decide whether to send it — a
    /// transport-level failure should close the stream without a reply.
    pub fn decide(&self, req: &AuthorizeRequest) -> AuthorizeResponse {
        match req.kind {
            REQUEST_KIND_PORTMAP => self.decide_portmap(req.portmap.as_ref()),
            REQUEST_KIND_PROXY => self.decide_proxy(req.proxy.as_ref()),
            other => self.err_response(format!("unknown request type {other}")),
        }
    }

    fn decide_portmap(&self, req: Option<&PortmapAuthorizeReq>) -> AuthorizeResponse {
        let Some(req) = req else {
            return self.err_response("missing portmap request");
        };
        let is_trial = req.resource_id == pierce_core::TRIAL_RESOURCE_ID && self.trial;
        if is_trial || self.resources.get(req.resource_id).is_some() {
            AuthorizeResponse {
                node_name: self.node_name.clone(),
                err: None,
                portmap: Some(PortmapAuthorizeResp { is_trial }),
                proxy: None,
            }
        } else {
            self.err_response("resource not authorized")
        }
    }

    fn decide_proxy(&self, req: Option<&ProxyAuthorizeReq>) -> AuthorizeResponse {
        let Some(req) = req else {
            return self.err_response("missing proxy request");
        };
        if req.token != self.proxy_token {
            return self.err_response("token mismatch");
        }
        let route = if req.route.is_empty() {
            DEFAULT_ROUTE.to_string()
        } else {
            req.route.clone()
        };
        let dns = if req.dns.is_empty() {
            DEFAULT_DNS.to_string()
        } else {
            req.dns.clone()
        };
        AuthorizeResponse {
            node_name: self.node_name.clone(),
            err: None,
            portmap: None,
            proxy: Some(ProxyAuthorizeResp { route, dns }),
        }
    }

    fn err_response(&self, msg: impl Into<String>) -> AuthorizeResponse {
        AuthorizeResponse {
            node_name: self.node_name.clone(),
            err: Some(msg.into()),
            portmap: None,
            proxy: None,
        }
    }

    /// Run as the host's handler for `/resource/authorize/1.0.0`.
    pub async fn handle_stream(&self, mut stream: NetStream) {
        let fut = async {
            let body = stream.recv().await.map_err(Error::Net)?;
            let Some(body) = body else {
                return Ok::<_, Error>(());
            };
            let req: AuthorizeRequest = serde_json::from_slice(&body)?;
            let resp = self.decide(&req);
            let out = serde_json::to_vec(&resp)?;
            stream.send(&out).await.map_err(Error::Net)?;
            Ok(())
        };
        if let Err(e) = tokio::time::timeout(DEADLINE, fut).await.unwrap_or_else(|_| {
            tracing::warn!("authorize stream timed out");
            Ok(())
        }) {
            tracing::warn!(error = %e, "authorize handler failed");
        }
    }
}

/// Hook point for an alternate request/response carrier. No implementation ships here — only
/// the seam a future transport would plug into.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn request(&self, peer_id: PeerId, req: AuthorizeRequest) -> Result<AuthorizeResponse>;
}

/// Default [`AuthTransport`] riding directly over the transport host.
pub struct NetAuthTransport {
    host: std::sync::Arc<Host>,
}

impl NetAuthTransport {
    pub fn new(host: std::sync::Arc<Host>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl AuthTransport for NetAuthTransport {
    async fn request(&self, peer_id: PeerId, req: AuthorizeRequest) -> Result<AuthorizeResponse> {
        let addr = self
            .host
            .peers()
            .get(&peer_id)
            .ok_or_else(|| Error::NotFound(format!("peer {peer_id}")))?;
        let mut stream = self
            .host
            .dial(addr, ProtocolId::new(pierce_net::protocol::RESOURCE_AUTHORIZE))
            .await
            .map_err(Error::Net)?;
        let body = serde_json::to_vec(&req)?;
        tokio::time::timeout(DEADLINE, stream.send(&body))
            .await
            .map_err(|_| Error::HandshakeFailed("authorize request timed out".into()))?
            .map_err(Error::Net)?;
        let reply = tokio::time::timeout(DEADLINE, stream.recv())
            .await
            .map_err(|_| Error::HandshakeFailed("authorize response timed out".into()))?
            .map_err(Error::Net)?
            .ok_or_else(|| Error::HandshakeFailed("authorize stream closed".into()))?;
        Ok(serde_json::from_slice(&reply)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ResourceStore;
    use pierce_core::KvStore;
    use std::sync::Arc;

    fn resources() -> Arc<ResourceStore> {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path().join("test.redb")).unwrap();
        Arc::new(ResourceStore::load(kv).unwrap())
    }

    #[test]
    fn trial_sentinel_accepted_only_in_trial_mode() {
        let auth = Authorizer::new("gw", true, 1, resources());
        let req = AuthorizeRequest {
            kind: REQUEST_KIND_PORTMAP,
            portmap: Some(PortmapAuthorizeReq {
                resource_id: pierce_core::TRIAL_RESOURCE_ID,
            }),
            proxy: None,
        };
        let resp = auth.decide(&req);
        assert!(resp.is_ok());
        assert!(resp.portmap.unwrap().is_trial);
    }

    #[test]
    fn trial_sentinel_rejected_outside_trial_mode() {
        let auth = Authorizer::new("gw", false, 1, resources());
        let req = AuthorizeRequest {
            kind: REQUEST_KIND_PORTMAP,
            portmap: Some(PortmapAuthorizeReq {
                resource_id: pierce_core::TRIAL_RESOURCE_ID,
            }),
            proxy: None,
        };
        assert!(!auth.decide(&req).is_ok());
    }

    #[test]
    fn proxy_token_mismatch_is_unauthorized() {
        let auth = Authorizer::new("gw", false, 0xDEAD_BEEF, resources());
        let req = AuthorizeRequest {
            kind: REQUEST_KIND_PROXY,
            portmap: None,
            proxy: Some(ProxyAuthorizeReq {
                token: 1,
                route: String::new(),
                dns: String::new(),
            }),
        };
        assert!(!auth.decide(&req).is_ok());
    }

    #[test]
    fn proxy_empty_route_and_dns_fall_back_to_defaults() {
        let auth = Authorizer::new("gw", false, 42, resources());
        let req = AuthorizeRequest {
            kind: REQUEST_KIND_PROXY,
            portmap: None,
            proxy: Some(ProxyAuthorizeReq {
                token: 42,
                route: String::new(),
                dns: String::new(),
            }),
        };
        let resp = auth.decide(&req);
        let proxy = resp.proxy.unwrap();
        assert_eq!(proxy.route, DEFAULT_ROUTE);
        assert_eq!(proxy.dns, DEFAULT_DNS);
    }
}
