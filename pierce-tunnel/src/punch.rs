//! Synchronized TCP/UDP hole punch and the UDP-punch handshake framing.

use rand::RngCore;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use pierce_transport::{bind_reuseport_tcp, bind_reuseport_udp};

use crate::errors::{Error, Result};

const TCP_PUNCH_TIMEOUT: Duration = Duration::from_secs(5);
const UDP_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const UDP_KEEPALIVE: Duration = Duration::from_secs(5);

/// `u16 msgType | u16 len | payload[len]`.
const HANDSHAKE: u16 = 1;
const HANDSHAKE_ACK: u16 = 2;
const PUNCH_HEADER_LEN: usize = 2 + 2;

fn encode_punch_message(msg_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PUNCH_HEADER_LEN + payload.len());
    buf.extend_from_slice(&msg_type.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

fn decode_punch_message(buf: &[u8]) -> Result<(u16, &[u8])> {
    if buf.len() < PUNCH_HEADER_LEN {
        return Err(Error::MalformedControl("punch packet too short".into()));
    }
    let msg_type = u16::from_le_bytes(buf[0..2].try_into().expect("checked len"));
    let len = u16::from_le_bytes(buf[2..4].try_into().expect("checked len")) as usize;
    let payload = &buf[PUNCH_HEADER_LEN..];
    if payload.len() != len {
        return Err(Error::MalformedControl("punch packet length mismatch".into()));
    }
    Ok((msg_type, payload))
}

/// Sleep for `sync_time`, then dial the peer from the exact local port the
/// NAT probe used, so both sides' SYNs cross mid-flight through their NATs
/// (TCP variant of the punch handshake).
pub async fn punch_tcp(
    local_ip: IpAddr,
    local_port: u16,
    peer_addr: SocketAddr,
    sync_time: Duration,
) -> Result<TcpStream> {
    debug!(?sync_time, %peer_addr, "tcp punch: sleeping before connect");
    tokio::time::sleep(sync_time).await;

    let socket = bind_reuseport_tcp(local_port)?;
    let stream = timeout(TCP_PUNCH_TIMEOUT, socket.connect(peer_addr))
        .await
        .map_err(|_| Error::Timeout(format!("tcp punch to {peer_addr} timed out")))??;
    stream.set_nodelay(true).ok();
    let _ = local_ip; // only used to size the bind address when multi-homed; single-stack here.
    Ok(stream)
}

/// UDP hole-punch handshake. Returns
/// `(socket, check_send, check_recv)` where `check_send` is the token the
/// remote peer expects on every packet we send it, and `check_recv` is the
/// token we expect on every packet it sends us.
pub async fn punch_udp(
    local_port: u16,
    peer_addr: SocketAddr,
    sync_time: Duration,
) -> Result<(UdpSocket, u32, u32)> {
    debug!(?sync_time, %peer_addr, "udp punch: sleeping before handshake");
    tokio::time::sleep(sync_time).await;

    let socket = bind_reuseport_udp(local_port)?;
    socket.connect(peer_addr).await?;

    let mut rid_bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut rid_bytes);
    let rid = u32::from_le_bytes(rid_bytes);

    socket
        .send(&encode_punch_message(HANDSHAKE, &rid_bytes))
        .await?;

    let (msg_type, peer_rid_bytes) = read_punch_message(&socket, UDP_HANDSHAKE_TIMEOUT).await?;
    if peer_rid_bytes.len() != 4 {
        return Err(Error::MalformedControl("punch handshake payload must be 4 bytes".into()));
    }
    let peer_rid = u32::from_le_bytes(peer_rid_bytes.try_into().expect("checked len"));

    if msg_type == HANDSHAKE {
        socket
            .send(&encode_punch_message(HANDSHAKE_ACK, &rid_bytes))
            .await?;
        let (ack_type, ack_payload) = read_punch_message(&socket, UDP_HANDSHAKE_TIMEOUT).await?;
        if ack_type != HANDSHAKE_ACK || ack_payload.len() != 4 {
            return Err(Error::MalformedControl("expected handshake ack".into()));
        }
    } else if msg_type == HANDSHAKE_ACK {
        socket
            .send(&encode_punch_message(HANDSHAKE_ACK, &rid_bytes))
            .await?;
    } else {
        return Err(Error::MalformedControl(format!("unexpected punch msg type {msg_type}")));
    }

    debug!(%peer_addr, "udp punch handshake complete");
    Ok((socket, peer_rid, rid))
}

async fn read_punch_message(socket: &UdpSocket, wait: Duration) -> Result<(u16, Vec<u8>)> {
    let mut buf = [0u8; 1024];
    let n = timeout(wait, socket.recv(&mut buf))
        .await
        .map_err(|_| Error::Timeout("udp punch handshake timed out".into()))??;
    let (msg_type, payload) = decode_punch_message(&buf[..n])?;
    Ok((msg_type, payload.to_vec()))
}

pub fn udp_keepalive_interval() -> Duration {
    UDP_KEEPALIVE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punch_message_round_trips() {
        let encoded = encode_punch_message(HANDSHAKE, &[1, 2, 3, 4]);
        let (msg_type, payload) = decode_punch_message(&encoded).unwrap();
        assert_eq!(msg_type, HANDSHAKE);
        assert_eq!(payload, &[1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn udp_punch_completes_between_two_local_sockets() {
        let a = bind_reuseport_udp(0).unwrap();
        let b = bind_reuseport_udp(0).unwrap();
        let addr_a = a.local_addr().unwrap();
        let addr_b = b.local_addr().unwrap();
        drop(a);
        drop(b);

        let side_a = tokio::spawn(async move {
            punch_udp(addr_a.port(), addr_b, Duration::ZERO).await
        });
        let side_b = tokio::spawn(async move {
            punch_udp(addr_b.port(), addr_a, Duration::ZERO).await
        });

        let (sock_a, check_send_a, check_recv_a) = side_a.await.unwrap().expect("side a punch");
        let (sock_b, check_send_b, check_recv_b) = side_b.await.unwrap().expect("side b punch");

        // Each side's send-token is the other side's receive-token.
        assert_eq!(check_send_a, check_recv_b);
        assert_eq!(check_send_b, check_recv_a);
        drop(sock_a);
        drop(sock_b);
    }
}
