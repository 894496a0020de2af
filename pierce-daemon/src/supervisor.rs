//! The `Supervisor`: one struct owning every other component, constructed
//! explicitly by `main.rs` and passed down, rather than reached for through
//! a process-wide global.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use pierce_core::{seed, Config, Error, KvStore, Result};
use pierce_net::{Host, ProtocolId};
use pierce_portmap::{
    AppStore, Authorizer, PortmapApp, PortmapGatewayHandler, PortmapHandshake, PortmapListener,
    ResourceResolver, ResourceStore,
};
use pierce_rendezvous::{spawn_register_and_heartbeat, RegisterRequest, RendezvousClient};
use pierce_socks5::{Authenticator, Socks5GatewayHandler, TokenAuthenticator, TrialAuthenticator};
use pierce_tunnel::{TunnelManager, TunnelManagerConfig};
use pierce_route::DirectDialer;

use crate::metrics::Metrics;
use crate::peer_registry::PeerRegistry;
use crate::proxy_client::{ProxyClient, TunProxy};

const TUNNEL_METRIC_POLL: Duration = Duration::from_secs(15);

/// Adapts `Authorizer::handle_stream` (a plain method, shared between this
/// transport and future alternate transports per its own doc comment) onto
/// the host's [`pierce_net::StreamHandler`] trait.
struct AuthorizeHandler(Arc<Authorizer>);

#[async_trait::async_trait]
impl pierce_net::StreamHandler for AuthorizeHandler {
    async fn handle(&self, stream: pierce_net::NetStream) {
        self.0.handle_stream(stream).await;
    }
}

pub struct Supervisor {
    config: Config,
    host: Arc<Host>,
    kv: KvStore,
    rendezvous: Arc<RendezvousClient>,
    registry: Arc<PeerRegistry>,
    resources: Arc<ResourceStore>,
    apps: Arc<AppStore>,
    portmap_listener: Arc<PortmapListener>,
    proxy_client: Arc<ProxyClient>,
    tunnel_manager: Arc<TunnelManager>,
    metrics: Arc<Metrics>,
    listen_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    metrics_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// `Start(workDir, withPortmap)`. `workDir` is carried on
    /// `config.work_dir` rather than as a separate argument, since every
    /// path derived from it (`db_path`, `identity_path`) already hangs off
    /// [`Config`].
    pub async fn start(config: Config, with_portmap: bool) -> Result<Arc<Self>> {
        let seed = seed::load_or_create(config.identity_path())?;
        let signing_key = SigningKey::from_bytes(&seed);
        let host = Arc::new(Host::new(signing_key));
        info!(peer_id = %host.local_peer_id(), "identity loaded");

        let kv = KvStore::open(config.db_path())?;

        let rendezvous_addr = resolve_one(&config.rendezvous_addr).await?;
        let rendezvous = Arc::new(RendezvousClient::connect(rendezvous_addr).await?);
        let local_ip = outbound_local_ip(rendezvous_addr).await?;

        let register_req = RegisterRequest {
            peer_id: 0,
            tcp_port: config.listen_port,
            udp_port: config.listen_port,
            nat_type: Default::default(),
            exclusive_public_ipv4: false,
            local_ipv4: Some(local_ip),
            ipv6: None,
            os_tag: Some(std::env::consts::OS.to_string()),
        };
        let self_id = rendezvous.register(register_req.clone()).await?;
        spawn_register_and_heartbeat(rendezvous.clone(), register_req);

        let registry = Arc::new(PeerRegistry::new(host.clone(), rendezvous.clone()));

        let resources = Arc::new(ResourceStore::load(kv.clone())?);
        let apps = Arc::new(AppStore::load(kv.clone())?);

        let proxy_token = match kv.get_token()? {
            Some(t) => t,
            None => {
                let t = rand::random::<u64>();
                kv.set_token(t)?;
                t
            }
        };

        let authorizer = Arc::new(Authorizer::new(
            config.node_name.clone(),
            config.trial,
            proxy_token,
            resources.clone(),
        ));
        host.register_handler(
            ProtocolId::new(pierce_net::protocol::RESOURCE_AUTHORIZE),
            Arc::new(AuthorizeHandler(authorizer.clone())),
        );

        if with_portmap {
            let resolver = ResourceResolver::new(resources.clone());
            host.register_handler(
                ProtocolId::new(pierce_net::protocol::PORTMAP),
                Arc::new(PortmapGatewayHandler::new(resolver)),
            );

            let socks_auth: Arc<dyn Authenticator> = if config.trial {
                Arc::new(TrialAuthenticator)
            } else {
                Arc::new(TokenAuthenticator::new(proxy_token))
            };
            host.register_handler(
                ProtocolId::new(pierce_net::protocol::SOCKS5),
                Arc::new(Socks5GatewayHandler::new(socks_auth, Arc::new(DirectDialer))),
            );
        }

        let portmap_listener = Arc::new(PortmapListener::new(host.clone()));
        let proxy_client = Arc::new(ProxyClient::load(host.clone(), registry.clone(), kv.clone())?);

        // NAT test service assumed co-located with the rendezvous node,
        // listening on its own UDP port plus the next one up.
        let tunnel_cfg = TunnelManagerConfig {
            self_id,
            local_ip,
            rendezvous_addr,
            nat_test_host: rendezvous_addr.ip(),
            nat_test_port1: rendezvous_addr.port(),
            nat_test_port2: rendezvous_addr.port().wrapping_add(1),
            desired_public_port: config.listen_port,
        };
        let metrics = Arc::new(Metrics::new());
        let tunnel_manager =
            TunnelManager::with_metrics(tunnel_cfg, rendezvous.clone(), metrics.clone()).await?;

        let supervisor = Arc::new(Self {
            config,
            host: host.clone(),
            kv,
            rendezvous,
            registry,
            resources,
            apps,
            portmap_listener,
            proxy_client,
            tunnel_manager,
            metrics,
            listen_task: std::sync::Mutex::new(None),
            metrics_task: std::sync::Mutex::new(None),
        });

        let listen_addr: SocketAddr = SocketAddr::new(
            std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            supervisor.config.listen_port,
        );
        let host_for_listen = host.clone();
        let listen_handle = tokio::spawn(async move {
            if let Err(e) = host_for_listen.listen(listen_addr).await {
                warn!(%e, "overlay host listener exited");
            }
        });
        *supervisor.listen_task.lock().expect("mutex poisoned") = Some(listen_handle);

        let metrics_supervisor = supervisor.clone();
        let metrics_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TUNNEL_METRIC_POLL);
            loop {
                ticker.tick().await;
                metrics_supervisor
                    .metrics
                    .set_tunnels_active(metrics_supervisor.tunnel_manager.tunnel_count() as u64);
            }
        });
        *supervisor.metrics_task.lock().expect("mutex poisoned") = Some(metrics_handle);

        Ok(supervisor)
    }

    /// `Close()`: stops the accept loop and the metrics poll.
    /// Everything else (tunnels, rendezvous heartbeat) is daemon-lifetime
    /// background work that a process exit reclaims; there is no persisted
    /// "stopped" state to write back.
    pub fn close(&self) {
        if let Some(handle) = self.listen_task.lock().expect("mutex poisoned").take() {
            handle.abort();
        }
        if let Some(handle) = self.metrics_task.lock().expect("mutex poisoned").take() {
            handle.abort();
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn local_peer_id(&self) -> pierce_crypto::identity::PeerId {
        self.host.local_peer_id()
    }

    // ---- /resource ----

    pub fn add_resource(&self, resource: pierce_portmap::PortmapResource) -> Result<()> {
        Ok(self.resources.add(resource)?)
    }

    pub fn del_resource(&self, id: u64) -> Result<()> {
        Ok(self.resources.remove(id)?)
    }

    pub fn get_resources(&self) -> Vec<pierce_portmap::PortmapResource> {
        self.resources.list()
    }

    // ---- /app ----

    /// `AddApp`: resolves `app.peer_id`'s gateway, opens an
    /// agent-side listener bound to `(app.local_ip, app.local_port)`, and
    /// relays every accepted connection to the gateway over the port-map
    /// protocol.
    pub async fn add_app(self: &Arc<Self>, mut app: PortmapApp) -> Result<u64> {
        if app.id == 0 {
            app.id = self.apps.list().iter().map(|a| a.id).max().unwrap_or(0) + 1;
        }
        let gateway = self.registry.resolve(app.peer_id).await?;
        let ip: IpAddr = app
            .local_ip
            .parse()
            .map_err(|_| Error::Config(format!("invalid local_ip {}", app.local_ip)))?;

        let handshake = if app.is_trial() {
            PortmapHandshake {
                res_id: app.res_id,
                network: app.network,
                target_addr: app
                    .target_addr
                    .clone()
                    .ok_or_else(|| Error::Config("trial app missing target_addr".into()))?,
                target_port: app
                    .target_port
                    .ok_or_else(|| Error::Config("trial app missing target_port".into()))?,
            }
        } else {
            PortmapHandshake {
                res_id: app.res_id,
                network: app.network,
                target_addr: String::new(),
                target_port: 0,
            }
        };

        let bound_port = self
            .portmap_listener
            .add_listener(app.network, ip, app.local_port, gateway, handshake)
            .await?;
        app.local_port = bound_port;
        app.running = true;
        app.last_error = None;

        self.apps.add(app.clone()).or_else(|_| self.apps.update(app))?;
        Ok(bound_port as u64)
    }

    pub async fn update_app(self: &Arc<Self>, app: PortmapApp) -> Result<()> {
        if let Some(existing) = self.apps.get(app.id) {
            let ip: IpAddr = existing
                .local_ip
                .parse()
                .map_err(|_| Error::Config(format!("invalid local_ip {}", existing.local_ip)))?;
            self.portmap_listener
                .delete_listener(existing.network, ip, existing.local_port);
        }
        self.add_app(app).await.map(|_| ())
    }

    pub fn del_app(&self, id: u64) -> Result<()> {
        let app = self
            .apps
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("app {id}")))?;
        let ip: IpAddr = app
            .local_ip
            .parse()
            .map_err(|_| Error::Config(format!("invalid local_ip {}", app.local_ip)))?;
        self.portmap_listener.delete_listener(app.network, ip, app.local_port);
        Ok(self.apps.remove(id)?)
    }

    pub fn get_apps(&self) -> Vec<PortmapApp> {
        self.apps.list()
    }

    // ---- /proxy, /gateway ----

    pub async fn add_proxy_gateway(self: &Arc<Self>, peer: u64, token: u64) -> Result<u64> {
        self.proxy_client.add_proxy_gateway(peer, token).await
    }

    pub fn del_proxy_gateway(&self, id: u64) -> Result<()> {
        self.proxy_client.del_proxy_gateway(id)
    }

    pub async fn ping_proxy_gateway(&self, id: u64) -> Result<Duration> {
        self.proxy_client.ping_proxy_gateway(id).await
    }

    pub fn list_proxy_gateways(&self) -> Vec<crate::proxy_client::SocksOutbound> {
        self.proxy_client.list()
    }

    pub fn start_tun_proxy(&self, device: &str, gateway_idx: u64) -> Result<()> {
        TunProxy::start(device, gateway_idx)
    }

    pub fn stop_tun_proxy(&self) -> Result<()> {
        TunProxy::stop()
    }
}

async fn resolve_one(host_port: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(host_port)
        .await
        .map_err(Error::Io)?
        .next()
        .ok_or_else(|| Error::Config(format!("could not resolve {host_port}")))
}

/// Finds the local address the kernel would use to reach `target`, without
/// sending any traffic (a connected UDP socket never transmits on its own).
async fn outbound_local_ip(target: SocketAddr) -> Result<IpAddr> {
    let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr).await.map_err(Error::Io)?;
    socket.connect(target).await.map_err(Error::Io)?;
    Ok(socket.local_addr().map_err(Error::Io)?.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_one_accepts_dotted_quad() {
        let addr = resolve_one("127.0.0.1:9000").await.expect("resolve");
        assert_eq!(addr, "127.0.0.1:9000".parse().unwrap());
    }

    #[tokio::test]
    async fn resolve_one_rejects_garbage() {
        assert!(resolve_one("not-a-host-port").await.is_err());
    }

    #[tokio::test]
    async fn outbound_local_ip_finds_loopback_route() {
        let target: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let ip = outbound_local_ip(target).await.expect("outbound ip");
        assert!(ip.is_loopback());
    }
}
