//! Agent-side port-map listener: accepts local connections or datagrams and
//! relays each one against a dedicated gateway stream.
//!
//! Each accepted socket (or, for UDP, each datagram source) gets its own
//! task splicing bytes against its stream, the natural shape for `tokio`'s
//! per-connection task model.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use pierce_core::Transport;
use pierce_crypto::identity::PeerId;
use pierce_net::{Host, ProtocolId};

use crate::errors::{Error, Result};
use crate::types::{HandshakeResponse, PortmapHandshake};

/// `convertIndex(network, ip, port)` from the original: forms the listener
/// key used to detect (and collapse) duplicate `AddListener` calls.
pub fn convert_index(network: Transport, ip: IpAddr, port: u16) -> String {
    format!("{network}://{ip}:{port}")
}

struct ListenerEntry {
    port: u16,
    handle: JoinHandle<()>,
}

pub struct PortmapListener {
    host: Arc<Host>,
    listeners: DashMap<String, ListenerEntry>,
}

impl PortmapListener {
    pub fn new(host: Arc<Host>) -> Self {
        Self {
            host,
            listeners: DashMap::new(),
        }
    }

    /// Bind a local socket and relay every accepted connection/datagram
    /// source to `gateway` over `/portmap/1.0.0`, opening one stream
    /// per socket and sending `handshake` as the opening frame.
    ///
    /// Idempotent: calling this again with the same `(network, ip, port)`
    /// returns the already-bound port instead of binding twice.
    pub async fn add_listener(
        &self,
        network: Transport,
        ip: IpAddr,
        port: u16,
        gateway: PeerId,
        handshake: PortmapHandshake,
    ) -> Result<u16> {
        let key = convert_index(network, ip, port);
        if let Some(entry) = self.listeners.get(&key) {
            return Ok(entry.port);
        }

        let (bound_port, handle) = match network {
            Transport::Tcp => self.spawn_tcp(ip, port, gateway, handshake).await?,
            Transport::Udp => self.spawn_udp(ip, port, gateway, handshake).await?,
        };

        // Re-key on the resolved port so a second call naming the *resolved*
        // port (e.g. after a `local_port = 0` bind) is also idempotent.
        let resolved_key = convert_index(network, ip, bound_port);
        self.listeners.insert(
            resolved_key,
            ListenerEntry {
                port: bound_port,
                handle,
            },
        );
        Ok(bound_port)
    }

    pub fn delete_listener(&self, network: Transport, ip: IpAddr, port: u16) {
        let key = convert_index(network, ip, port);
        if let Some((_, entry)) = self.listeners.remove(&key) {
            entry.handle.abort();
        }
    }

    async fn spawn_tcp(
        &self,
        ip: IpAddr,
        port: u16,
        gateway: PeerId,
        handshake: PortmapHandshake,
    ) -> Result<(u16, JoinHandle<()>)> {
        let listener = TcpListener::bind(SocketAddr::new(ip, port))
            .await
            .map_err(Error::Io)?;
        let bound_port = listener.local_addr().map_err(Error::Io)?.port();
        let host = self.host.clone();
        let handle = tokio::spawn(async move {
            loop {
                let (socket, peer_addr) = match listener.accept().await {
                    Ok(ok) => ok,
                    Err(e) => {
                        warn!(error = %e, "portmap tcp accept failed, stopping listener");
                        break;
                    }
                };
                let host = host.clone();
                let handshake = handshake.clone();
                tokio::spawn(async move {
                    if let Err(e) = relay_one_tcp(host, gateway, handshake, socket).await {
                        debug!(%peer_addr, error = %e, "portmap relay failed");
                    }
                });
            }
        });
        Ok((bound_port, handle))
    }

    async fn spawn_udp(
        &self,
        ip: IpAddr,
        port: u16,
        gateway: PeerId,
        handshake: PortmapHandshake,
    ) -> Result<(u16, JoinHandle<()>)> {
        let socket = Arc::new(UdpSocket::bind(SocketAddr::new(ip, port)).await.map_err(Error::Io)?);
        let bound_port = socket.local_addr().map_err(Error::Io)?.port();
        let host = self.host.clone();
        let sessions: Arc<Mutex<HashMap<SocketAddr, mpsc::Sender<Bytes>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let (n, from) = match socket.recv_from(&mut buf).await {
                    Ok(ok) => ok,
                    Err(e) => {
                        warn!(error = %e, "portmap udp recv failed, stopping listener");
                        break;
                    }
                };
                let datagram = Bytes::copy_from_slice(&buf[..n]);
                let mut guard = sessions.lock().await;
                let existing = guard.get(&from).cloned();
                drop(guard);
                if let Some(tx) = existing {
                    if tx.send(datagram).await.is_err() {
                        sessions.lock().await.remove(&from);
                    }
                    continue;
                }
                let (tx, rx) = mpsc::channel(64);
                let _ = tx.try_send(datagram);
                sessions.lock().await.insert(from, tx);

                let host = host.clone();
                let handshake = handshake.clone();
                let socket = socket.clone();
                let sessions = sessions.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        relay_one_udp_session(host, gateway, handshake, socket.clone(), from, rx).await
                    {
                        debug!(%from, error = %e, "portmap udp session failed");
                    }
                    sessions.lock().await.remove(&from);
                });
            }
        });
        Ok((bound_port, handle))
    }
}

async fn open_gateway_stream(
    host: &Arc<Host>,
    gateway: PeerId,
    handshake: &PortmapHandshake,
) -> Result<pierce_net::NetStream> {
    let addr = host
        .peers()
        .get(&gateway)
        .ok_or_else(|| Error::NotFound(format!("gateway peer {gateway}")))?;
    let mut stream = host
        .dial(addr, ProtocolId::new(pierce_net::protocol::PORTMAP))
        .await
        .map_err(Error::Net)?;
    let body = serde_json::to_vec(handshake)?;
    stream.send(&body).await.map_err(Error::Net)?;
    let reply = stream
        .recv()
        .await
        .map_err(Error::Net)?
        .ok_or_else(|| Error::HandshakeFailed("gateway closed before handshake reply".into()))?;
    let resp: HandshakeResponse = serde_json::from_slice(&reply)?;
    if !resp.is_ok() {
        return Err(Error::HandshakeFailed(resp.msg));
    }
    Ok(stream)
}

async fn relay_one_tcp(
    host: Arc<Host>,
    gateway: PeerId,
    handshake: PortmapHandshake,
    mut socket: TcpStream,
) -> Result<()> {
    let mut stream = open_gateway_stream(&host, gateway, &handshake).await?;
    let mut buf = [0u8; 16 * 1024];
    loop {
        tokio::select! {
            res = socket.read(&mut buf) => {
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
                        if socket.write_all(&data).await.is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
        }
    }
    Ok(())
}

async fn relay_one_udp_session(
    host: Arc<Host>,
    gateway: PeerId,
    handshake: PortmapHandshake,
    socket: Arc<UdpSocket>,
    from: SocketAddr,
    mut inbound: mpsc::Receiver<Bytes>,
) -> Result<()> {
    let mut stream = open_gateway_stream(&host, gateway, &handshake).await?;
    loop {
        tokio::select! {
            datagram = inbound.recv() => {
                match datagram {
                    Some(data) => {
                        if stream.send(&data).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = stream.recv() => {
                match msg {
                    Ok(Some(data)) => {
                        if socket.send_to(&data, from).await.is_err() {
                            break;
                        }
                    }
                    _ => break,
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_index_is_stable_for_equal_inputs() {
        let a = convert_index(Transport::Tcp, "127.0.0.1".parse().unwrap(), 80);
        let b = convert_index(Transport::Tcp, "127.0.0.1".parse().unwrap(), 80);
        assert_eq!(a, b);
    }

    #[test]
    fn convert_index_differs_across_network() {
        let ip = "127.0.0.1".parse().unwrap();
        let tcp = convert_index(Transport::Tcp, ip, 80);
        let udp = convert_index(Transport::Udp, ip, 80);
        assert_ne!(tcp, udp);
    }
}
