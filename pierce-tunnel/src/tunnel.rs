//! A single peer's established tunnel connection. Owned exclusively by
//! [`crate::manager::TunnelManager`]: callers never construct one directly.

use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::codec::{Decoder, Encoder};

use pierce_wire::{decode_udp_datagram, encode_udp_datagram, ControlOpcode, Frame, FrameCodec};

use crate::errors::{Error, Result};

/// The two transports a tunnel's underlying connection can use.
pub enum Conn {
    Tcp(TcpStream),
    Udp {
        socket: UdpSocket,
        /// Token this tunnel must stamp on every packet it sends (the
        /// remote's expected receive token).
        check_send: u32,
        /// Token this tunnel expects on every packet it receives.
        check_recv: u32,
    },
}

impl Conn {
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            Conn::Tcp(s) => s.peer_addr().ok(),
            Conn::Udp { socket, .. } => socket.peer_addr().ok(),
        }
    }
}

/// A single logical tunnel to one peer. Carries framed packets over
/// whichever transport the hole-punch established.
pub struct Tunnel {
    pub peer_id: u64,
    conn: AsyncMutex<Conn>,
    /// Bytes accumulated from partial TCP reads between [`Tunnel::recv`]
    /// calls — UDP tunnels never need this since each datagram is one frame.
    read_buf: AsyncMutex<BytesMut>,
    missed_heartbeats: AtomicU32,
    closed: std::sync::atomic::AtomicBool,
    /// Set before each outbound heartbeat is sent, cleared when its ack (or
    /// any empty control packet) arrives; still set 30s later means the
    /// reply was missed.
    pub pending_heartbeat_ack: std::sync::atomic::AtomicBool,
}

/// Missing this many consecutive heartbeat replies closes the tunnel.
pub const MAX_MISSED_HEARTBEATS: u32 = 2;

impl Tunnel {
    pub fn new(peer_id: u64, conn: Conn) -> Arc<Self> {
        Arc::new(Self {
            peer_id,
            conn: AsyncMutex::new(conn),
            read_buf: AsyncMutex::new(BytesMut::with_capacity(4096)),
            missed_heartbeats: AtomicU32::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
            pending_heartbeat_ack: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        // Best-effort, non-blocking snapshot; callers only use this for
        // logging, so a momentarily stale value is fine.
        self.conn.try_lock().ok().and_then(|c| c.peer_addr())
    }

    /// Send one frame over the tunnel's underlying connection, re-writing
    /// the `from`/`to` header verbatim (a forwarding hop preserves `from`).
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        let mut conn = self.conn.lock().await;
        match &mut *conn {
            Conn::Tcp(stream) => {
                let mut codec = FrameCodec;
                let mut buf = BytesMut::new();
                codec
                    .encode(frame.clone(), &mut buf)
                    .map_err(Error::Wire)?;
                stream.write_all(&buf).await?;
            }
            Conn::Udp { socket, check_send, .. } => {
                let datagram = encode_udp_datagram(frame, *check_send);
                socket.send(&datagram).await?;
            }
        }
        Ok(())
    }

    pub async fn send_control(&self, opcode: ControlOpcode) -> Result<()> {
        let frame = Frame::control(frame_self_id(self), opcode);
        self.send(&frame).await
    }

    /// Receive the next frame. Returns `Ok(None)` on a clean TCP EOF.
    /// Malformed or mismatched-check UDP datagrams are dropped silently
    /// per  and this simply loops to the next datagram.
    pub async fn recv(&self) -> Result<Option<Frame>> {
        loop {
            let mut conn = self.conn.lock().await;
            match &mut *conn {
                Conn::Tcp(stream) => {
                    let mut buf = self.read_buf.lock().await;
                    loop {
                        let mut codec = FrameCodec;
                        if let Some(frame) = codec.decode(&mut buf).map_err(Error::Wire)? {
                            return Ok(Some(frame));
                        }
                        let mut chunk = [0u8; 4096];
                        let n = stream.read(&mut chunk).await?;
                        if n == 0 {
                            return Ok(None);
                        }
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
                Conn::Udp { socket, check_recv, .. } => {
                    let mut buf = [0u8; 65536];
                    let n = socket.recv(&mut buf).await?;
                    match decode_udp_datagram(&buf[..n], *check_recv) {
                        Ok(Some(frame)) => return Ok(Some(frame)),
                        Ok(None) => continue, // check-token mismatch: drop silently.
                        Err(e) => return Err(Error::Wire(e)),
                    }
                }
            }
        }
    }

    pub fn record_heartbeat_ack(&self) {
        self.missed_heartbeats.store(0, Ordering::Release);
    }

    /// Returns `true` if this missed heartbeat pushed the tunnel past
    /// [`MAX_MISSED_HEARTBEATS`] and it should now be closed.
    pub fn record_heartbeat_miss(&self) -> bool {
        self.missed_heartbeats.fetch_add(1, Ordering::AcqRel) + 1 >= MAX_MISSED_HEARTBEATS
    }
}

/// Control frames are self-addressed (`to = 0`); `from` only matters for
/// logging on the receiving end; reusing `peer_id` here is harmless since
/// the field is never interpreted by the control-opcode path.
fn frame_self_id(tunnel: &Tunnel) -> u64 {
    tunnel.peer_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use pierce_wire::CONTROL_DEST;
    use tokio::net::{TcpListener, UdpSocket as TokioUdp};

    #[tokio::test]
    async fn tcp_tunnel_round_trips_a_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_task = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server_sock, _) = listener.accept().await.unwrap();
        let client_sock = client_task.await.unwrap();

        let server_tunnel = Tunnel::new(1, Conn::Tcp(server_sock));
        let client_tunnel = Tunnel::new(2, Conn::Tcp(client_sock));

        let frame = Frame::new(2, 1, &b"payload"[..]).unwrap();
        client_tunnel.send(&frame).await.unwrap();
        let received = server_tunnel.recv().await.unwrap().unwrap();
        assert_eq!(received.payload, frame.payload);
    }

    #[tokio::test]
    async fn udp_tunnel_drops_mismatched_check_token() {
        let a = TokioUdp::bind("127.0.0.1:0").await.unwrap();
        let b = TokioUdp::bind("127.0.0.1:0").await.unwrap();
        let addr_a = a.local_addr().unwrap();
        let addr_b = b.local_addr().unwrap();
        a.connect(addr_b).await.unwrap();
        b.connect(addr_a).await.unwrap();

        let tunnel_a = Tunnel::new(
            1,
            Conn::Udp {
                socket: a,
                check_send: 111,
                check_recv: 222,
            },
        );
        let tunnel_b = Tunnel::new(
            2,
            Conn::Udp {
                socket: b,
                check_send: 222,
                check_recv: 111,
            },
        );

        let frame = Frame::new(1, 2, &b"hi"[..]).unwrap();
        tunnel_a.send(&frame).await.unwrap();
        let received = tunnel_b.recv().await.unwrap().unwrap();
        assert_eq!(received.payload, frame.payload);
    }

    #[tokio::test]
    async fn heartbeat_miss_counter_closes_after_two() {
        let (a, b) = tokio::io::duplex(64);
        // Wrap duplex halves is not a TcpStream, so just exercise the
        // counter logic directly against a tunnel built on a real socket pair.
        drop((a, b));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server_sock, _) = listener.accept().await.unwrap();
        let _client_sock = client.await.unwrap();
        let tunnel = Tunnel::new(1, Conn::Tcp(server_sock));

        assert!(!tunnel.record_heartbeat_miss());
        assert!(tunnel.record_heartbeat_miss());
        tunnel.record_heartbeat_ack();
        assert!(!tunnel.record_heartbeat_miss());
    }

    #[test]
    fn control_dest_is_zero() {
        assert_eq!(CONTROL_DEST, 0);
    }
}
