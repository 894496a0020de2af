#![forbid(unsafe_code)]

use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

use crate::config::SdkConfig;
use crate::error::{Error, Result};
use crate::types::{PortmapAppView, PortmapResourceView, SocksOutboundView, VersionInfoView};

/// Mirror of `pierce_daemon::http`'s response envelope.
#[derive(Debug, serde::Deserialize)]
struct Envelope<T> {
    code: i32,
    message: String,
    data: Option<T>,
}

/// HTTP client for a running `pierced` instance's REST surface.
///
/// Every call is blocking `ureq` dispatched through `spawn_blocking`, the
/// same idiom the upgrade client uses to talk to its own HTTP endpoints
/// without pulling in an async HTTP stack.
pub struct DaemonClient {
    agent: ureq::Agent,
    base_url: String,
}

impl DaemonClient {
    pub fn new(cfg: SdkConfig) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_millis(cfg.request_timeout_ms))
                .build(),
            base_url: cfg.base_url,
        }
    }

    pub async fn list_resources(&self) -> Result<Vec<PortmapResourceView>> {
        self.get("/resource").await
    }

    pub async fn add_resource(&self, resource: &PortmapResourceView) -> Result<()> {
        self.post_empty("/resource", resource).await
    }

    pub async fn del_resource(&self, id: u64) -> Result<()> {
        self.delete(&format!("/resource/{id}")).await
    }

    pub async fn list_apps(&self) -> Result<Vec<PortmapAppView>> {
        self.get("/app").await
    }

    pub async fn add_app(&self, app: &PortmapAppView) -> Result<u64> {
        self.post("/app", app).await
    }

    pub async fn update_app(&self, id: u64, app: &PortmapAppView) -> Result<()> {
        self.put_empty(&format!("/app/{id}"), app).await
    }

    pub async fn del_app(&self, id: u64) -> Result<()> {
        self.delete(&format!("/app/{id}")).await
    }

    pub async fn list_gateways(&self) -> Result<Vec<SocksOutboundView>> {
        self.get("/gateway").await
    }

    pub async fn add_gateway(&self, peer: u64, token: u64) -> Result<u64> {
        #[derive(Serialize)]
        struct Req {
            peer: u64,
            token: u64,
        }
        self.post("/gateway", &Req { peer, token }).await
    }

    pub async fn del_gateway(&self, id: u64) -> Result<()> {
        self.delete(&format!("/gateway/{id}")).await
    }

    pub async fn ping_gateway(&self, id: u64) -> Result<u64> {
        self.get(&format!("/gateway/{id}/ping")).await
    }

    pub async fn start_tun(&self, device: &str, gateway_idx: u64) -> Result<()> {
        #[derive(Serialize)]
        struct Req<'a> {
            device: &'a str,
            gateway_idx: u64,
        }
        self.post_empty("/proxy/tun/start", &Req { device, gateway_idx })
            .await
    }

    pub async fn stop_tun(&self) -> Result<()> {
        self.post_empty("/proxy/tun/stop", &()).await
    }

    pub async fn query_upgrade(&self, server: &str, program: &str) -> Result<VersionInfoView> {
        let path = format!(
            "/upgrade?server={}&program={}",
            urlencode(server),
            urlencode(program)
        );
        self.get(&path).await
    }

    async fn get<T: DeserializeOwned + Send + 'static>(&self, path: &str) -> Result<T> {
        let agent = self.agent.clone();
        let url = format!("{}{path}", self.base_url);
        let env = tokio::task::spawn_blocking(move || -> Result<Envelope<T>> {
            agent
                .get(&url)
                .call()
                .map_err(|e| Error::request(e.to_string()))?
                .into_json()
                .map_err(Error::from)
        })
        .await??;
        unwrap_envelope(env)
    }

    async fn post<B: Serialize, T: DeserializeOwned + Send + 'static>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        unwrap_envelope(self.send_with_body("POST", path, body).await?)
    }

    async fn post_empty<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        check_envelope(self.send_with_body("POST", path, body).await?)
    }

    async fn put_empty<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        check_envelope(self.send_with_body("PUT", path, body).await?)
    }

    async fn send_with_body<B: Serialize, T: DeserializeOwned + Send + 'static>(
        &self,
        method: &str,
        path: &str,
        body: &B,
    ) -> Result<Envelope<T>> {
        let agent = self.agent.clone();
        let url = format!("{}{path}", self.base_url);
        let method = method.to_string();
        let body = serde_json::to_value(body)?;
        tokio::task::spawn_blocking(move || -> Result<Envelope<T>> {
            agent
                .request(&method, &url)
                .send_json(body)
                .map_err(|e| Error::request(e.to_string()))?
                .into_json()
                .map_err(Error::from)
        })
        .await?
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let agent = self.agent.clone();
        let url = format!("{}{path}", self.base_url);
        let env = tokio::task::spawn_blocking(move || -> Result<Envelope<()>> {
            agent
                .delete(&url)
                .call()
                .map_err(|e| Error::request(e.to_string()))?
                .into_json()
                .map_err(Error::from)
        })
        .await??;
        check_envelope(env)
    }
}

fn unwrap_envelope<T>(env: Envelope<T>) -> Result<T> {
    if env.code == 0 {
        env.data.ok_or_else(|| Error::Daemon {
            code: env.code,
            message: "missing data on success envelope".into(),
        })
    } else {
        Err(Error::Daemon {
            code: env.code,
            message: env.message,
        })
    }
}

fn check_envelope<T>(env: Envelope<T>) -> Result<()> {
    if env.code == 0 {
        Ok(())
    } else {
        Err(Error::Daemon {
            code: env.code,
            message: env.message,
        })
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
