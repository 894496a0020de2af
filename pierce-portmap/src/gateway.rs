//! Gateway-side port-map stream handler: reads the handshake, resolves the
//! target through the resource store, dials it, and splices the stream to
//! the resulting socket.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use pierce_core::{Transport, TRIAL_RESOURCE_ID};
use pierce_net::{NetStream, StreamHandler};

use crate::store::ResourceStore;
use crate::types::{HandshakeResponse, PortmapHandshake};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves an inbound handshake to the target a gateway should dial.
///
/// Trial handshakes (`res_id == 666666`) carry their own target and bypass
/// this entirely; non-trial handshakes consult the resource store.
pub trait HandshakeResolver: Send + Sync {
    fn resolve(&self, handshake: &PortmapHandshake) -> Result<(Transport, String, u16), String>;
}

pub struct ResourceResolver {
    resources: Arc<ResourceStore>,
}

impl ResourceResolver {
    pub fn new(resources: Arc<ResourceStore>) -> Self {
        Self { resources }
    }
}

impl HandshakeResolver for ResourceResolver {
    fn resolve(&self, handshake: &PortmapHandshake) -> Result<(Transport, String, u16), String> {
        if handshake.res_id == TRIAL_RESOURCE_ID {
            return Ok((handshake.network, handshake.target_addr.clone(), handshake.target_port));
        }
        let resource = self
            .resources
            .get(handshake.res_id)
            .ok_or_else(|| format!("unknown resource {}", handshake.res_id))?;
        Ok((resource.network, resource.target_addr, resource.target_port))
    }
}

/// Registered as the host's handler for `/portmap/1.0.0` on the
/// gateway side.
pub struct PortmapGatewayHandler<R: HandshakeResolver> {
    resolver: R,
}

impl<R: HandshakeResolver> PortmapGatewayHandler<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    async fn reply_and_maybe_splice(&self, mut stream: NetStream) {
        let body = match stream.recv().await {
            Ok(Some(body)) => body,
            _ => return,
        };
        let handshake: PortmapHandshake = match serde_json::from_slice(&body) {
            Ok(hs) => hs,
            Err(e) => {
                let _ = reply(&mut stream, HandshakeResponse::error(format!("bad handshake: {e}"))).await;
                return;
            }
        };

        let (network, addr, port) = match self.resolver.resolve(&handshake) {
            Ok(ok) => ok,
            Err(msg) => {
                let _ = reply(&mut stream, HandshakeResponse::error(msg)).await;
                return;
            }
        };

        match network {
            Transport::Tcp => self.dial_and_splice_tcp(stream, &addr, port).await,
            Transport::Udp => self.dial_and_splice_udp(stream, &addr, port).await,
        }
    }

    async fn dial_and_splice_tcp(&self, mut stream: NetStream, addr: &str, port: u16) {
        let target = match tokio::time::timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect(format!("{addr}:{port}")),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                let _ = reply(&mut stream, HandshakeResponse::error(format!("connect failed: {e}"))).await;
                return;
            }
            Err(_) => {
                let _ = reply(&mut stream, HandshakeResponse::error("connect timed out")).await;
                return;
            }
        };
        if reply(&mut stream, HandshakeResponse::ok()).await.is_err() {
            return;
        }
        splice_tcp(stream, target).await;
    }

    async fn dial_and_splice_udp(&self, mut stream: NetStream, addr: &str, port: u16) {
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(s) => s,
            Err(e) => {
                let _ = reply(&mut stream, HandshakeResponse::error(format!("bind failed: {e}"))).await;
                return;
            }
        };
        if let Err(e) = socket.connect(format!("{addr}:{port}")).await {
            let _ = reply(&mut stream, HandshakeResponse::error(format!("connect failed: {e}"))).await;
            return;
        }
        if reply(&mut stream, HandshakeResponse::ok()).await.is_err() {
            return;
        }
        splice_udp(stream, socket).await;
    }
}

async fn reply(stream: &mut NetStream, resp: HandshakeResponse) -> Result<(), ()> {
    let body = match serde_json::to_vec(&resp) {
        Ok(b) => b,
        Err(_) => return Err(()),
    };
    stream.send(&body).await.map_err(|_| ())
}

async fn splice_tcp(mut stream: NetStream, mut target: TcpStream) {
    let mut buf = [0u8; 16 * 1024];
    loop {
        tokio::select! {
            res = target.read(&mut buf) => {
                match res {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if stream.send(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
            msg = stream.recv() => {
                match msg {
                    Ok(Some(data)) => {
                        if target.write_all(&data).await.is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
        }
    }
}

async fn splice_udp(mut stream: NetStream, target: UdpSocket) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        tokio::select! {
            res = target.recv(&mut buf) => {
                match res {
                    Ok(n) => {
                        if stream.send(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            msg = stream.recv() => {
                match msg {
                    Ok(Some(data)) => {
                        if target.send(&data).await.is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
        }
    }
}

#[async_trait]
impl<R: HandshakeResolver + 'static> StreamHandler for PortmapGatewayHandler<R> {
    async fn handle(&self, stream: NetStream) {
        self.reply_and_maybe_splice(stream).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ResourceStore;
    use crate::types::PortmapResource;
    use pierce_core::KvStore;

    fn resources_with(res: PortmapResource) -> Arc<ResourceStore> {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path().join("test.redb")).unwrap();
        let store = ResourceStore::load(kv).unwrap();
        store.add(res).unwrap();
        Arc::new(store)
    }

    #[test]
    fn trial_handshake_resolves_to_its_own_target() {
        let resolver = ResourceResolver::new(resources_with(PortmapResource {
            id: 1,
            name: "r".into(),
            network: Transport::Tcp,
            target_addr: "10.0.0.1".into(),
            target_port: 22,
            local_ip: None,
            local_port: None,
        }));
        let hs = PortmapHandshake {
            res_id: TRIAL_RESOURCE_ID,
            network: Transport::Tcp,
            target_addr: "example.org".into(),
            target_port: 80,
        };
        let (network, addr, port) = resolver.resolve(&hs).unwrap();
        assert_eq!(network, Transport::Tcp);
        assert_eq!(addr, "example.org");
        assert_eq!(port, 80);
    }

    #[test]
    fn non_trial_handshake_resolves_through_resource_store() {
        let resolver = ResourceResolver::new(resources_with(PortmapResource {
            id: 42,
            name: "r".into(),
            network: Transport::Tcp,
            target_addr: "127.0.0.1".into(),
            target_port: 22,
            local_ip: None,
            local_port: None,
        }));
        let hs = PortmapHandshake {
            res_id: 42,
            network: Transport::Tcp,
            target_addr: String::new(),
            target_port: 0,
        };
        let (_, addr, port) = resolver.resolve(&hs).unwrap();
        assert_eq!(addr, "127.0.0.1");
        assert_eq!(port, 22);
    }

    #[test]
    fn unknown_resource_id_is_rejected() {
        let resolver = ResourceResolver::new(resources_with(PortmapResource {
            id: 1,
            name: "r".into(),
            network: Transport::Tcp,
            target_addr: "127.0.0.1".into(),
            target_port: 22,
            local_ip: None,
            local_port: None,
        }));
        let hs = PortmapHandshake {
            res_id: 999,
            network: Transport::Tcp,
            target_addr: String::new(),
            target_port: 0,
        };
        assert!(resolver.resolve(&hs).is_err());
    }
}
