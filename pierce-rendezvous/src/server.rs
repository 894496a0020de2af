//! Rendezvous server: Register (appID=1) and Query (appID=2) over framed
//! UDP and TCP listeners.

use bytes::{Bytes, BytesMut};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, warn};

use pierce_wire::{AppEnvelope, Frame, FrameCodec, CONTROL_DEST};

use crate::errors::{Error, Result};
use crate::protocol::{QueryRequest, QueryResponse, RegisterRequest, QUERY_APP, REGISTER_APP};
use crate::registry::Registry;
use crate::snowflake::SnowflakeGenerator;

/// Read-deadline extended per successful heartbeat.
const HEARTBEAT_DEADLINE: Duration = Duration::from_secs(30);

pub struct RendezvousServer {
    registry: Arc<Registry>,
    snowflake: SnowflakeGenerator,
}

impl RendezvousServer {
    pub fn new(machine_id: u16) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            snowflake: SnowflakeGenerator::new(machine_id),
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Periodic sweep that evicts peers which have not heartbeat-ed in
    /// [`crate::registry::EVICTION_AFTER`] — the UDP-side equivalent of "on
    /// read timeout the record is removed", since one shared UDP socket has
    /// no per-peer read deadline to hang a timeout off of.
    pub fn spawn_eviction_sweep(self: &Arc<Self>) {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                ticker.tick().await;
                registry.evict_stale();
            }
        });
    }

    /// Build the reply frame (if any) for one inbound frame from
    /// `remote_ip`. `self_id` is this rendezvous node's own peer id, used as
    /// the reply frame's `from`.
    fn handle_frame(&self, self_id: u64, frame: &Frame, remote_ip: IpAddr) -> Option<Frame> {
        let envelope = match AppEnvelope::decode(&frame.payload) {
            Ok(e) => e,
            Err(e) => {
                warn!(%e, "malformed app envelope");
                return None;
            }
        };

        match envelope.to_app {
            REGISTER_APP => self.handle_register(self_id, frame.from, &envelope.data, remote_ip),
            QUERY_APP => self.handle_query(self_id, &envelope.data),
            other => {
                debug!(app = other, "no handler for app id");
                None
            }
        }
    }

    fn handle_register(
        &self,
        self_id: u64,
        claimed_from: u64,
        data: &[u8],
        remote_ip: IpAddr,
    ) -> Option<Frame> {
        if data.is_empty() {
            // Heartbeat: extend liveness, ack with the same peer id back.
            let peer_id = claimed_from;
            if !self.registry.touch(peer_id) {
                debug!(peer_id, "heartbeat for unknown peer, ignoring");
                return None;
            }
            return Some(ack_frame(self_id, claimed_from, peer_id));
        }

        let req: RegisterRequest = match serde_json::from_slice(data) {
            Ok(r) => r,
            Err(e) => {
                warn!(%e, "malformed register request");
                return None;
            }
        };

        let peer_id = if req.peer_id == 0 {
            self.snowflake.next_id()
        } else {
            req.peer_id
        };

        let record = self.registry.upsert(
            peer_id,
            remote_ip,
            req.tcp_port,
            req.udp_port,
            req.nat_type,
            req.exclusive_public_ipv4,
        );
        info!(peer_id = record.peer_id, %remote_ip, "peer registered");

        Some(ack_frame(self_id, claimed_from, peer_id))
    }

    fn handle_query(&self, self_id: u64, data: &[u8]) -> Option<Frame> {
        let req: QueryRequest = match serde_json::from_slice(data) {
            Ok(r) => r,
            Err(e) => {
                warn!(%e, "malformed query request");
                return None;
            }
        };

        let record = self.registry.get(req.peer_id)?;
        let resp = QueryResponse {
            peer_id: record.peer_id,
            public_ip: record.public_ip,
            tcp_port: record.tcp_port,
            udp_port: record.udp_port,
            nat_type: record.nat_type,
            exclusive_public_ipv4: record.exclusive_public_ipv4,
            extra: req.extra,
        };
        let body = serde_json::to_vec(&resp).ok()?;
        let envelope = AppEnvelope::new(QUERY_APP, QUERY_APP, body);
        Frame::new(self_id, req.peer_id, envelope.encode()).ok()
    }

    pub async fn run_udp(self: Arc<Self>, self_id: u64, addr: SocketAddr) -> Result<()> {
        let socket = UdpSocket::bind(addr).await.map_err(Error::Io)?;
        info!(%addr, "rendezvous UDP listener up");
        let mut buf = BytesMut::zeroed(65536);
        loop {
            let (n, from) = socket.recv_from(&mut buf).await.map_err(Error::Io)?;
            let mut codec = FrameCodec;
            let mut incoming = BytesMut::from(&buf[..n]);
            let frame = match codec.decode(&mut incoming) {
                Ok(Some(f)) => f,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%e, %from, "dropping malformed frame");
                    continue;
                }
            };

            // Two NATed peers can't dial each other before they've punched
            // through, so the add-tunnel negotiation rides over
            // this same socket: anything not addressed to this rendezvous
            // node (`to == CONTROL_DEST`, the convention every Register/Query
            // request uses) is forwarded verbatim to the target peer's last
            // known UDP address, same as a tunnel's own `receive()` rule.
            if frame.to != CONTROL_DEST {
                self.relay_to_peer(&socket, &frame).await;
                continue;
            }

            if let Some(reply) = self.handle_frame(self_id, &frame, from.ip()) {
                let mut out = BytesMut::new();
                if codec.encode(reply, &mut out).is_ok() {
                    let _ = socket.send_to(&out, from).await;
                }
            }
        }
    }

    async fn relay_to_peer(&self, socket: &UdpSocket, frame: &Frame) {
        let Some(record) = self.registry.get(frame.to) else {
            debug!(to = frame.to, "relay target unknown, dropping");
            return;
        };
        let dest = SocketAddr::new(record.public_ip, record.udp_port);
        let mut codec = FrameCodec;
        let mut out = BytesMut::new();
        if codec.encode(frame.clone(), &mut out).is_ok() {
            let _ = socket.send_to(&out, dest).await;
        }
    }

    pub async fn run_tcp(self: Arc<Self>, self_id: u64, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await.map_err(Error::Io)?;
        info!(%addr, "rendezvous TCP listener up");
        loop {
            let (socket, peer_addr) = listener.accept().await.map_err(Error::Io)?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.serve_tcp_connection(self_id, socket, peer_addr).await {
                    debug!(%peer_addr, error = %e, "rendezvous tcp connection closed");
                }
            });
        }
    }

    async fn serve_tcp_connection(
        &self,
        self_id: u64,
        mut socket: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<()> {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::with_capacity(4096);
        let mut registered_peer: Option<u64> = None;

        loop {
            let frame = match read_one_frame(&mut socket, &mut codec, &mut buf).await {
                Ok(Some(f)) => f,
                Ok(None) => break,
                Err(_) => break,
            };
            if let Some(reply) = self.handle_frame(self_id, &frame, peer_addr.ip()) {
                registered_peer = Some(frame.from);
                let mut out = BytesMut::new();
                codec.encode(reply, &mut out).map_err(Error::Wire)?;
                socket.write_all(&out).await.map_err(Error::Io)?;
            }
        }

        if let Some(peer_id) = registered_peer {
            self.registry.remove(peer_id);
            debug!(peer_id, "peer evicted on tcp eof");
        }
        Ok(())
    }
}

async fn read_one_frame(
    socket: &mut TcpStream,
    codec: &mut FrameCodec,
    buf: &mut BytesMut,
) -> Result<Option<Frame>> {
    use tokio::io::AsyncReadExt;
    loop {
        if let Some(frame) = codec.decode(buf).map_err(Error::Wire)? {
            return Ok(Some(frame));
        }
        let mut chunk = [0u8; 4096];
        let n = match timeout(HEARTBEAT_DEADLINE, socket.read(&mut chunk)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(Error::Io(e)),
            Err(_) => return Ok(None),
        };
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn ack_frame(self_id: u64, to: u64, assigned_peer_id: u64) -> Frame {
    let body = Bytes::copy_from_slice(&assigned_peer_id.to_le_bytes());
    let envelope = AppEnvelope::new(REGISTER_APP, REGISTER_APP, body);
    Frame::new(self_id, to, envelope.encode()).expect("ack frame always within size limits")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pierce_core::Transport;

    fn server() -> RendezvousServer {
        RendezvousServer::new(1)
    }

    #[test]
    fn register_assigns_id_when_zero() {
        let srv = server();
        let req = RegisterRequest {
            peer_id: 0,
            tcp_port: 100,
            udp_port: 200,
            nat_type: pierce_core::NatType::Cone,
            exclusive_public_ipv4: false,
            local_ipv4: None,
            ipv6: None,
            os_tag: None,
        };
        let body = serde_json::to_vec(&req).unwrap();
        let reply = srv
            .handle_register(1, 0, &body, "10.0.0.1".parse().unwrap())
            .expect("reply");
        let envelope = AppEnvelope::decode(&reply.payload).unwrap();
        let assigned = u64::from_le_bytes(envelope.data[..8].try_into().unwrap());
        assert_ne!(assigned, 0);
        assert_eq!(srv.registry.get(assigned).unwrap().tcp_port, 100);
    }

    #[test]
    fn heartbeat_on_unknown_peer_is_ignored() {
        let srv = server();
        assert!(srv.handle_register(1, 555, &[], "10.0.0.2".parse().unwrap()).is_none());
    }

    #[test]
    fn query_for_missing_peer_returns_none() {
        let srv = server();
        let req = QueryRequest {
            peer_id: 9999,
            extra: Transport::Tcp,
        };
        let body = serde_json::to_vec(&req).unwrap();
        assert!(srv.handle_query(1, &body).is_none());
    }

    #[tokio::test]
    async fn relay_forwards_frame_to_registered_peer() {
        let srv = Arc::new(server());
        let peer_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer_socket.local_addr().unwrap();
        srv.registry.upsert(
            42,
            peer_addr.ip(),
            peer_addr.port(),
            peer_addr.port(),
            pierce_core::NatType::Cone,
            false,
        );

        let relay_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let frame = Frame::new(7, 42, &b"add-tunnel-req"[..]).unwrap();
        srv.relay_to_peer(&relay_socket, &frame).await;

        let mut buf = [0u8; 256];
        let n = tokio::time::timeout(Duration::from_secs(1), peer_socket.recv(&mut buf))
            .await
            .expect("recv timed out")
            .unwrap();
        let mut incoming = BytesMut::from(&buf[..n]);
        let decoded = FrameCodec.decode(&mut incoming).unwrap().unwrap();
        assert_eq!(decoded.from, 7);
        assert_eq!(decoded.to, 42);
        assert_eq!(&decoded.payload[..], b"add-tunnel-req");
    }

    #[test]
    fn query_echoes_transport_tag() {
        let srv = server();
        srv.registry
            .upsert(7, "5.5.5.5".parse().unwrap(), 1, 2, pierce_core::NatType::Cone, true);
        let req = QueryRequest {
            peer_id: 7,
            extra: Transport::Udp,
        };
        let body = serde_json::to_vec(&req).unwrap();
        let reply = srv.handle_query(1, &body).expect("reply");
        let envelope = AppEnvelope::decode(&reply.payload).unwrap();
        let resp: QueryResponse = serde_json::from_slice(&envelope.data).unwrap();
        assert_eq!(resp.extra, Transport::Udp);
        assert_eq!(resp.peer_id, 7);
    }
}
