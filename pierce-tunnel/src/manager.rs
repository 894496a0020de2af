//! Per-peer tunnel manager. Owns at most one [`Tunnel`] per
//! peer, runs the add-tunnel negotiation and hole-punch, and forwards
//! packets that arrive addressed to someone other than this node.

use bytes::Bytes;
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use pierce_core::{now_ns, Transport};
use pierce_rendezvous::RendezvousClient;
use pierce_transport::{classify, ProbeConfig};
use pierce_wire::{AppEnvelope, ControlOpcode, Frame};

use crate::control::{
    AddTunnelConfig, AddTunnelRequest, AddTunnelResponse, ADD_TUNNEL_REQ_APP, ADD_TUNNEL_RSP_APP,
    ERRNO_BUSY, ERRNO_NAT_PROBE_FAILED,
};
use crate::dispatch::Dispatcher;
use crate::errors::{Error, Result};
use crate::judger::{judger_key, AddJudger};
use crate::metrics::{NoopMetricsSink, TunnelMetricsSink};
use crate::punch::{punch_tcp, punch_udp};
use crate::tunnel::{Conn, Tunnel};

const ADD_TUNNEL_WAIT: Duration = Duration::from_secs(10);
/// Fixed punch delay used on the *responder* side; the initiator instead
/// computes a latency-corrected delay.
const RESPONDER_SYNC_TIME: Duration = Duration::from_millis(300);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub struct TunnelManagerConfig {
    pub self_id: u64,
    pub local_ip: IpAddr,
    pub rendezvous_addr: SocketAddr,
    pub nat_test_host: IpAddr,
    pub nat_test_port1: u16,
    pub nat_test_port2: u16,
    pub desired_public_port: u16,
}

pub struct TunnelManager {
    cfg: TunnelManagerConfig,
    tunnels: DashMap<u64, Arc<Tunnel>>,
    judger: AddJudger,
    dispatcher: Arc<Dispatcher>,
    rendezvous: Arc<RendezvousClient>,
    relay_socket: Arc<UdpSocket>,
    pending: DashMap<u64, oneshot::Sender<AddTunnelResponse>>,
    metrics: Arc<dyn TunnelMetricsSink>,
}

impl TunnelManager {
    pub async fn new(
        cfg: TunnelManagerConfig,
        rendezvous: Arc<RendezvousClient>,
    ) -> Result<Arc<Self>> {
        Self::with_metrics(cfg, rendezvous, Arc::new(NoopMetricsSink)).await
    }

    pub async fn with_metrics(
        cfg: TunnelManagerConfig,
        rendezvous: Arc<RendezvousClient>,
        metrics: Arc<dyn TunnelMetricsSink>,
    ) -> Result<Arc<Self>> {
        let bind_addr = if cfg.rendezvous_addr.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let relay_socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        relay_socket.connect(cfg.rendezvous_addr).await?;

        let manager = Arc::new(Self {
            cfg,
            tunnels: DashMap::new(),
            judger: AddJudger::new(),
            dispatcher: Dispatcher::new(),
            rendezvous,
            relay_socket,
            pending: DashMap::new(),
            metrics,
        });
        manager.clone().spawn_relay_reader();
        Ok(manager)
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn tunnel_count(&self) -> usize {
        self.tunnels.len()
    }

    fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            test_host: self.cfg.nat_test_host,
            port1: self.cfg.nat_test_port1,
            port2: self.cfg.nat_test_port2,
            desired_public_port: self.cfg.desired_public_port,
        }
    }

    /// Background task reading the relay socket: the rendezvous node
    /// forwards any `AddTunnelRequest`/`AddTunnelResponse` addressed to us
    /// over the control-plane channel — see `control.rs`.
    fn spawn_relay_reader(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut buf = vec![0u8; 65536];
            loop {
                let n = match self.relay_socket.recv(&mut buf).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(%e, "tunnel relay socket closed");
                        return;
                    }
                };
                if let Err(e) = self.clone().handle_relay_datagram(&buf[..n]).await {
                    debug!(%e, "dropping malformed relay datagram");
                }
            }
        });
    }

    async fn handle_relay_datagram(self: Arc<Self>, data: &[u8]) -> Result<()> {
        use tokio_util::codec::Decoder;
        let mut buf = bytes::BytesMut::from(data);
        let frame = match pierce_wire::FrameCodec.decode(&mut buf).map_err(Error::Wire)? {
            Some(f) => f,
            None => return Ok(()),
        };
        let envelope = AppEnvelope::decode(&frame.payload).map_err(Error::Wire)?;
        match envelope.to_app {
            ADD_TUNNEL_RSP_APP => {
                let rsp: AddTunnelResponse = serde_json::from_slice(&envelope.data)?;
                if let Some((_, sender)) = self.pending.remove(&frame.from) {
                    let _ = sender.send(rsp);
                }
            }
            ADD_TUNNEL_REQ_APP => {
                let req: AddTunnelRequest = serde_json::from_slice(&envelope.data)?;
                let this = self.clone();
                tokio::spawn(async move { this.handle_incoming_add_tunnel_request(req).await });
            }
            other => debug!(app = other, "unhandled relay app id"),
        }
        Ok(())
    }

    async fn send_relay(&self, to: u64, app_id: u32, body: Vec<u8>) -> Result<()> {
        let envelope = AppEnvelope::new(app_id, app_id, body);
        let frame = Frame::new(self.cfg.self_id, to, envelope.encode())?;
        let mut out = bytes::BytesMut::new();
        {
            use tokio_util::codec::Encoder;
            pierce_wire::FrameCodec
                .encode(frame, &mut out)
                .map_err(Error::Wire)?;
        }
        self.relay_socket.send(&out).await?;
        Ok(())
    }

    ///  `getTunnel`: returns the cached tunnel if alive, otherwise
    /// runs the full add-tunnel negotiation and hole-punch.
    pub async fn get_tunnel(self: &Arc<Self>, peer_id: u64) -> Result<Arc<Tunnel>> {
        if let Some(existing) = self.tunnels.get(&peer_id) {
            if !existing.is_closed() {
                return Ok(existing.clone());
            }
        }

        let key = judger_key(self.cfg.self_id, peer_id);
        let attempt_time = now_ns();
        if !self.judger.check_and_add(key, attempt_time, false) {
            self.metrics.record_add_tunnel_race();
            return Err(Error::AddTunnelBusy);
        }
        let result = self.negotiate_and_punch(peer_id, attempt_time).await;
        self.judger.delete(key);
        result
    }

    async fn negotiate_and_punch(self: &Arc<Self>, peer_id: u64, attempt_time: i64) -> Result<Arc<Tunnel>> {
        info!(peer_id, "negotiating tunnel");

        // Step 2: confirm the peer is known to the rendezvous before
        // spending time on a NAT probe and punch attempt.
        self.rendezvous.query(peer_id, Transport::Tcp).await?;

        // Step 3: NAT probe to learn our own current public address.
        let probe = classify(&self.probe_config())
            .await
            .map_err(Error::Transport)?;

        // Step 4: send AddTunnelRequest and wait up to 10s.
        let (tx, rx) = oneshot::channel();
        self.pending.insert(peer_id, tx);
        let req = AddTunnelRequest {
            id: self.cfg.self_id,
            time: attempt_time,
            config: AddTunnelConfig {
                public_ip: probe.public_ip,
                public_port: probe.public_port,
            },
        };
        let body = serde_json::to_vec(&req)?;
        let t0 = now_ns();
        self.send_relay(peer_id, ADD_TUNNEL_REQ_APP, body).await?;

        let rsp = match timeout(ADD_TUNNEL_WAIT, rx).await {
            Ok(Ok(rsp)) => rsp,
            Ok(Err(_)) => {
                self.pending.remove(&peer_id);
                return Err(Error::Timeout("add-tunnel response channel dropped".into()));
            }
            Err(_) => {
                self.pending.remove(&peer_id);
                return Err(Error::Timeout(format!("add-tunnel request to {peer_id} timed out")));
            }
        };
        let t4 = now_ns();

        if rsp.errno == ERRNO_BUSY {
            return Err(Error::AddTunnelBusy);
        }
        if !rsp.is_ok() {
            return Err(Error::HandshakeFailed(format!("peer reported errno {}", rsp.errno)));
        }

        // Step 5: latency-corrected sync time.
        let ttl = (t4 - t0 - (rsp.t2 - rsp.t1)) / 2;
        let sync_time_ns = (rsp.sync_time_ns - ttl).max(0);
        let sync_time = Duration::from_nanos(sync_time_ns as u64);

        // Step 6/7: punch and install.
        let peer_addr = SocketAddr::new(rsp.config.public_ip, rsp.config.public_port);
        let tunnel = self
            .punch_and_install(peer_id, peer_addr, probe.local_port, sync_time)
            .await?;
        Ok(tunnel)
    }

    async fn handle_incoming_add_tunnel_request(self: Arc<Self>, req: AddTunnelRequest) {
        let key = judger_key(self.cfg.self_id, req.id);
        if !self.judger.check_and_add(key, req.time, true) {
            self.metrics.record_add_tunnel_race();
            info!(peer = req.id, "add-tunnel busy, rejecting incoming request");
            let rsp = AddTunnelResponse::busy(now_ns());
            let body = match serde_json::to_vec(&rsp) {
                Ok(b) => b,
                Err(_) => return,
            };
            let _ = self.send_relay(req.id, ADD_TUNNEL_RSP_APP, body).await;
            return;
        }

        let t1 = now_ns();
        let probe_result = classify(&self.probe_config()).await;
        let t2 = now_ns();

        let (errno, probe) = match probe_result {
            Ok(p) => (0, Some(p)),
            Err(e) => {
                warn!(%e, "nat probe failed while answering add-tunnel request");
                (ERRNO_NAT_PROBE_FAILED, None)
            }
        };

        let config = probe
            .as_ref()
            .map(|p| AddTunnelConfig {
                public_ip: p.public_ip,
                public_port: p.public_port,
            })
            .unwrap_or(AddTunnelConfig {
                public_ip: IpAddr::from([0, 0, 0, 0]),
                public_port: 0,
            });

        let rsp = AddTunnelResponse {
            errno,
            t1,
            t2,
            sync_time_ns: RESPONDER_SYNC_TIME.as_nanos() as i64,
            config,
        };
        let body = match serde_json::to_vec(&rsp) {
            Ok(b) => b,
            Err(_) => {
                self.judger.delete(key);
                return;
            }
        };
        if self.send_relay(req.id, ADD_TUNNEL_RSP_APP, body).await.is_err() {
            self.judger.delete(key);
            return;
        }

        let Some(probe) = probe else {
            self.judger.delete(key);
            return;
        };

        let peer_addr = SocketAddr::new(req.config.public_ip, req.config.public_port);
        let result = self
            .punch_and_install(req.id, peer_addr, probe.local_port, RESPONDER_SYNC_TIME)
            .await;
        self.judger.delete(key);
        if let Err(e) = result {
            warn!(peer = req.id, %e, "responder-side punch failed");
        }
    }

    async fn punch_and_install(
        self: &Arc<Self>,
        peer_id: u64,
        peer_addr: SocketAddr,
        local_port: u16,
        sync_time: Duration,
    ) -> Result<Arc<Tunnel>> {
        let conn = match punch_tcp(self.cfg.local_ip, local_port, peer_addr, sync_time).await {
            Ok(stream) => Conn::Tcp(stream),
            Err(tcp_err) => {
                debug!(%tcp_err, "tcp punch failed, falling back to udp");
                let (socket, check_send, check_recv) =
                    punch_udp(local_port, peer_addr, sync_time).await?;
                Conn::Udp {
                    socket,
                    check_send,
                    check_recv,
                }
            }
        };

        let tunnel = Tunnel::new(peer_id, conn);
        self.tunnels.insert(peer_id, tunnel.clone());
        self.spawn_heartbeat(tunnel.clone());
        self.spawn_reader(tunnel.clone());
        info!(peer_id, "tunnel established");
        Ok(tunnel)
    }

    fn spawn_heartbeat(self: &Arc<Self>, tunnel: Arc<Tunnel>) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                if tunnel.is_closed() {
                    return;
                }
                if tunnel
                    .pending_heartbeat_ack
                    .swap(true, std::sync::atomic::Ordering::AcqRel)
                {
                    if tunnel.record_heartbeat_miss() {
                        warn!(peer_id = tunnel.peer_id, "heartbeat missed twice, closing tunnel");
                        manager.metrics.record_heartbeat_miss();
                        manager.close_tunnel(tunnel.peer_id);
                        return;
                    }
                }
                if tunnel
                    .send_control(ControlOpcode::Heartbeat)
                    .await
                    .is_err()
                {
                    manager.close_tunnel(tunnel.peer_id);
                    return;
                }
            }
        });
    }

    fn spawn_reader(self: &Arc<Self>, tunnel: Arc<Tunnel>) {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                match tunnel.recv().await {
                    Ok(Some(frame)) => manager.on_frame(&tunnel, frame).await,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(peer_id = tunnel.peer_id, %e, "tunnel read error");
                        break;
                    }
                }
            }
            manager.close_tunnel(tunnel.peer_id);
        });
    }

    async fn on_frame(self: &Arc<Self>, tunnel: &Arc<Tunnel>, frame: Frame) {
        if frame.is_control() {
            self.on_control_frame(tunnel, &frame).await;
            return;
        }
        if frame.to == self.cfg.self_id {
            self.dispatch_local(frame.from, frame.payload).await;
        } else {
            self.forward(frame).await;
        }
    }

    async fn on_control_frame(&self, tunnel: &Arc<Tunnel>, frame: &Frame) {
        if frame.payload.is_empty() {
            tunnel.record_heartbeat_ack();
            tunnel
                .pending_heartbeat_ack
                .store(false, std::sync::atomic::Ordering::Release);
            return;
        }
        match frame.control_opcode() {
            Ok(Some(ControlOpcode::Heartbeat)) => {
                let _ = tunnel.send_control(ControlOpcode::HeartbeatAck).await;
            }
            Ok(Some(ControlOpcode::HeartbeatAck)) => {
                tunnel.record_heartbeat_ack();
                tunnel
                    .pending_heartbeat_ack
                    .store(false, std::sync::atomic::Ordering::Release);
            }
            _ => {}
        }
    }

    async fn dispatch_local(&self, from_peer: u64, payload: Bytes) {
        let envelope = match AppEnvelope::decode(&payload) {
            Ok(e) => e,
            Err(e) => {
                debug!(%e, "malformed app envelope on inbound frame");
                return;
            }
        };
        if let Err(e) = self
            .dispatcher
            .dispatch(envelope.to_app, from_peer, envelope.from_app, envelope.data)
            .await
        {
            warn!(%e, from_peer, "dispatch failed, closing tunnel");
            self.close_tunnel(from_peer);
        }
    }

    /// Forward a packet verbatim to another live tunnel (
    /// `receive()`: "Else, look up tunnels[to] and forward the packet
    /// verbatim"). Silently dropped if there is no such tunnel.
    async fn forward(&self, frame: Frame) {
        let Some(target) = self.tunnels.get(&frame.to).map(|t| t.clone()) else {
            debug!(to = frame.to, "forward target has no tunnel, dropping");
            return;
        };
        let payload_len = frame.payload.len() as u64;
        if let Err(e) = target.send(&frame).await {
            debug!(%e, to = frame.to, "forward failed");
        } else {
            self.metrics.record_bytes_relayed(payload_len);
        }
    }

    pub fn close_tunnel(&self, peer_id: u64) {
        if let Some((_, tunnel)) = self.tunnels.remove(&peer_id) {
            tunnel.mark_closed();
            info!(peer_id, "tunnel closed");
        }
    }
}
