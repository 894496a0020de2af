//! SOCKS5 proxy-client side of the supervisor: `AddProxyGateway`,
//! `PingProxyGateway`, `StartTunProxy`, `StopTunProxy`, and the CIDR→dialer
//! bookkeeping backing `pierce_route::RouteTable`.
//!
//! Each outbound gets one `ArcSwap<SocksDialer>` handle rather than a plain
//! `Arc`: re-running `AddProxyGateway` for an
//! id that already exists swaps the dialer in place instead of requiring
//! callers to tear down and re-add the route, so an in-flight `RouteTable`
//! lookup never race against the old dialer being dropped out from under it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use pierce_core::{Error, KvStore, Result};
use pierce_net::Host;
use pierce_route::{Dialer, Ipv4Cidr, RouteTable};
use pierce_socks5::SocksDialer;
use serde::{Deserialize, Serialize};

use crate::peer_registry::PeerRegistry;

const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Persisted record for one configured upstream gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocksOutbound {
    pub id: u64,
    pub remark: String,
    pub open: bool,
    pub peer: u64,
    pub token: u64,
    pub route_cidr: String,
    pub dns: Option<String>,
    /// Filled in from the gateway's authorize response once reachable;
    /// empty until the first successful `AddProxyGateway`/ping.
    pub peer_name: Option<String>,
}

/// A forwarding-swap wrapper over one outbound's dialer, so updating an
/// outbound in place never drops a dialer a concurrent route lookup is
/// mid-use with.
struct ObDialer {
    active: ArcSwap<SocksDialer>,
}

#[async_trait::async_trait]
impl Dialer for ObDialer {
    async fn dial(&self, target: SocketAddr) -> std::io::Result<Box<dyn pierce_route::DialedStream>> {
        self.active.load().dial(target).await
    }
}

pub struct ProxyClient {
    host: Arc<Host>,
    registry: Arc<PeerRegistry>,
    kv: KvStore,
    routes: Arc<RouteTable>,
    outbounds: Mutex<HashMap<u64, SocksOutbound>>,
    dialers: Mutex<HashMap<u64, Arc<ObDialer>>>,
    next_id: Mutex<u64>,
}

impl ProxyClient {
    pub fn load(host: Arc<Host>, registry: Arc<PeerRegistry>, kv: KvStore) -> Result<Self> {
        let outbounds = kv
            .get_json::<HashMap<u64, SocksOutbound>>(pierce_core::store::KEY_SOCKS_OUTBOUND)?
            .unwrap_or_default();
        let next_id = outbounds.keys().max().copied().unwrap_or(0) + 1;
        Ok(Self {
            host,
            registry,
            kv,
            routes: Arc::new(RouteTable::new()),
            outbounds: Mutex::new(outbounds),
            dialers: Mutex::new(HashMap::new()),
            next_id: Mutex::new(next_id),
        })
    }

    pub fn route_table(&self) -> Arc<RouteTable> {
        self.routes.clone()
    }

    pub fn list(&self) -> Vec<SocksOutbound> {
        self.outbounds
            .lock()
            .expect("proxy client mutex poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// `AddProxyGateway(peerID, token)`. Authorizes against the
    /// gateway's proxy-token check, then installs (or refreshes, if an
    /// outbound to this peer already exists) a CIDR route to a
    /// [`SocksDialer`] reaching it.
    pub async fn add_proxy_gateway(self: &Arc<Self>, peer: u64, token: u64) -> Result<u64> {
        let peer_id = self.registry.resolve(peer).await?;
        let dialer = Arc::new(SocksDialer::new(self.host.clone(), peer_id, b"pierce".to_vec(), token));

        let existing_id = self
            .outbounds
            .lock()
            .expect("proxy client mutex poisoned")
            .values()
            .find(|o| o.peer == peer)
            .map(|o| o.id);

        let (id, route_cidr) = match existing_id {
            Some(id) => {
                let cidr = self
                    .outbounds
                    .lock()
                    .expect("proxy client mutex poisoned")
                    .get(&id)
                    .map(|o| o.route_cidr.clone())
                    .unwrap_or_else(|| "0.0.0.0/0".to_string());
                (id, cidr)
            }
            None => {
                let mut next = self.next_id.lock().expect("proxy client mutex poisoned");
                let id = *next;
                *next += 1;
                (id, "0.0.0.0/0".to_string())
            }
        };

        let mut dialers = self.dialers.lock().expect("proxy client mutex poisoned");
        match dialers.get(&id) {
            Some(handle) => handle.active.store(dialer),
            None => {
                let handle = Arc::new(ObDialer {
                    active: ArcSwap::new(dialer),
                });
                let cidr: Ipv4Cidr = route_cidr.parse()?;
                self.routes.add(cidr, handle.clone() as Arc<dyn Dialer>)?;
                dialers.insert(id, handle);
            }
        }
        drop(dialers);

        let outbound = SocksOutbound {
            id,
            remark: String::new(),
            open: true,
            peer,
            token,
            route_cidr,
            dns: None,
            peer_name: None,
        };
        self.outbounds
            .lock()
            .expect("proxy client mutex poisoned")
            .insert(id, outbound);
        self.persist()?;
        Ok(id)
    }

    pub fn del_proxy_gateway(&self, id: u64) -> Result<()> {
        let outbound = self
            .outbounds
            .lock()
            .expect("proxy client mutex poisoned")
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("proxy gateway {id}")))?;
        if let Ok(cidr) = outbound.route_cidr.parse::<Ipv4Cidr>() {
            self.routes.del(cidr);
        }
        self.dialers.lock().expect("proxy client mutex poisoned").remove(&id);
        self.persist()
    }

    /// `PingProxyGateway(idx)`: measures a raw TCP connect round-trip to the
    /// outbound's resolved peer address as a reachability probe.
    pub async fn ping_proxy_gateway(&self, id: u64) -> Result<Duration> {
        let peer = self
            .outbounds
            .lock()
            .expect("proxy client mutex poisoned")
            .get(&id)
            .map(|o| o.peer)
            .ok_or_else(|| Error::NotFound(format!("proxy gateway {id}")))?;
        let peer_id = self.registry.resolve(peer).await?;
        let addr = self
            .host
            .peers()
            .get(&peer_id)
            .ok_or_else(|| Error::NotReady(format!("no known address for peer {peer}")))?;

        let start = Instant::now();
        tokio::time::timeout(PING_TIMEOUT, tokio::net::TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout(format!("ping to proxy gateway {id} timed out")))?
            .map_err(Error::Io)?;
        Ok(start.elapsed())
    }

    fn persist(&self) -> Result<()> {
        let outbounds = self.outbounds.lock().expect("proxy client mutex poisoned");
        self.kv.set_json(pierce_core::store::KEY_SOCKS_OUTBOUND, &*outbounds)?;
        Ok(())
    }
}

/// TUN-mode egress. The TUN device's IP stack is an external collaborator
/// and out of scope here; this only documents the boundary a real
/// implementation would hand a file descriptor across.
pub struct TunProxy;

impl TunProxy {
    pub fn start(_device: &str, _gateway_idx: u64) -> Result<()> {
        Err(Error::NotReady(
            "TUN attachment is an external collaborator, not implemented in-process".into(),
        ))
    }

    pub fn stop() -> Result<()> {
        Ok(())
    }
}
