//! Agent/gateway-side rendezvous client: registers once, then heartbeats
//! and reconnects with exponential backoff over the framed UDP wire
//! protocol.

use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{info, warn};

use pierce_core::Transport;
use pierce_wire::{AppEnvelope, Frame, FrameCodec};

use crate::errors::{Error, Result};
use crate::protocol::{QueryRequest, QueryResponse, RegisterRequest, QUERY_APP, REGISTER_APP};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

pub struct RendezvousClient {
    endpoint: SocketAddr,
    socket: UdpSocket,
    assigned_peer_id: AtomicU64,
}

impl RendezvousClient {
    pub async fn connect(endpoint: SocketAddr) -> Result<Self> {
        let local = if endpoint.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(local).await.map_err(Error::Io)?;
        socket.connect(endpoint).await.map_err(Error::Io)?;
        Ok(Self {
            endpoint,
            socket,
            assigned_peer_id: AtomicU64::new(0),
        })
    }

    pub fn peer_id(&self) -> u64 {
        self.assigned_peer_id.load(Ordering::Acquire)
    }

    async fn send_and_await(&self, self_id: u64, to_app: u32, body: Vec<u8>) -> Result<Frame> {
        let envelope = AppEnvelope::new(to_app, to_app, body);
        let frame = Frame::new(self_id, 0, envelope.encode())
            .map_err(|e| Error::RequestFailed(e.to_string()))?;
        let mut out = BytesMut::new();
        FrameCodec.encode(frame, &mut out).map_err(Error::Wire)?;
        self.socket.send(&out).await.map_err(Error::Io)?;

        let mut buf = vec![0u8; 65536];
        let n = timeout(REQUEST_TIMEOUT, self.socket.recv(&mut buf))
            .await
            .map_err(|_| Error::RequestFailed("rendezvous request timed out".into()))?
            .map_err(Error::Io)?;
        let mut incoming = BytesMut::from(&buf[..n]);
        FrameCodec
            .decode(&mut incoming)
            .map_err(Error::Wire)?
            .ok_or_else(|| Error::RequestFailed("incomplete reply frame".into()))
    }

    /// Register (or re-register) with the rendezvous node, returning the
    /// assigned peer id.
    pub async fn register(&self, mut req: RegisterRequest) -> Result<u64> {
        let claimed = req.peer_id;
        req.peer_id = self.peer_id();
        if req.peer_id == 0 {
            req.peer_id = claimed;
        }
        let body = serde_json::to_vec(&req)?;
        let reply = self.send_and_await(req.peer_id, REGISTER_APP, body).await?;
        let envelope = AppEnvelope::decode(&reply.payload).map_err(Error::Wire)?;
        if envelope.data.len() < 8 {
            return Err(Error::RequestFailed("register reply too short".into()));
        }
        let assigned = u64::from_le_bytes(envelope.data[..8].try_into().expect("checked len"));
        self.assigned_peer_id.store(assigned, Ordering::Release);
        Ok(assigned)
    }

    pub async fn heartbeat(&self) -> Result<()> {
        let peer_id = self.peer_id();
        if peer_id == 0 {
            return Err(Error::NotRegistered(0));
        }
        self.send_and_await(peer_id, REGISTER_APP, Vec::new()).await?;
        Ok(())
    }

    pub async fn query(&self, target_peer: u64, extra: Transport) -> Result<QueryResponse> {
        let req = QueryRequest {
            peer_id: target_peer,
            extra,
        };
        let body = serde_json::to_vec(&req)?;
        let reply = self.send_and_await(self.peer_id(), QUERY_APP, body).await?;
        let envelope = AppEnvelope::decode(&reply.payload).map_err(Error::Wire)?;
        Ok(serde_json::from_slice(&envelope.data)?)
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }
}

/// Spawn the register-then-heartbeat-forever task. On any failure, it falls
/// back to registering again with exponential backoff starting at 1 s,
/// capping at [`BACKOFF_MAX`].
pub fn spawn_register_and_heartbeat(client: Arc<RendezvousClient>, req: RegisterRequest) {
    tokio::spawn(async move {
        let mut backoff = BACKOFF_BASE;
        loop {
            match client.register(req.clone()).await {
                Ok(peer_id) => {
                    info!(peer_id, endpoint = %client.endpoint(), "registered with rendezvous");
                    backoff = BACKOFF_BASE;
                    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
                    loop {
                        ticker.tick().await;
                        if let Err(e) = client.heartbeat().await {
                            warn!(%e, "heartbeat failed, will re-register");
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(%e, backoff_secs = backoff.as_secs(), "register failed");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
    });
}
