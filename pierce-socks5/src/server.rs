//! Gateway-side SOCKS5 handler, registered against the overlay host for
//! [`pierce_net::protocol::SOCKS5`].
//!
//! Unlike a standalone SOCKS5 daemon reading a raw byte socket, every step
//! here rides as one sealed [`pierce_net::NetStream`] message, so
//! negotiation/auth/request all use `crate::protocol`'s whole-message
//! encode/decode rather than `crate::io`'s incremental byte reads (those are
//! reserved for the real, local-facing SOCKS5 listener in `client.rs`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

use pierce_net::{NetStream, StreamHandler};
use pierce_route::Dialer;

use crate::auth::{Authenticator, SessionCache};
use crate::errors::{Error, Result};
use crate::protocol::{
    decode_packet_frame, encode_packet_frame, Addr, NegotiationReply, NegotiationRequest, Reply,
    Request, UserPassReply, UserPassRequest, CMD_CONNECT, CMD_CONNECT_UDP, CMD_PACKET_CONN,
    METHOD_NO_AUTH, METHOD_NO_ACCEPTABLE, METHOD_USER_PASS, REP_COMMAND_NOT_SUPPORTED,
    REP_GENERAL_FAILURE, REP_HOST_UNREACHABLE,
};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// PACKET-CONN's backing UDP socket is evicted after this long without a
/// read, so an abandoned session doesn't hold the relay task forever.
pub const PACKET_CONN_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Registered as the overlay host's handler for the SOCKS5 protocol id on a
/// gateway that lets peers egress traffic through it.
pub struct Socks5GatewayHandler {
    authenticator: Arc<dyn Authenticator>,
    sessions: Arc<SessionCache>,
    dialer: Arc<dyn Dialer>,
}

impl Socks5GatewayHandler {
    pub fn new(authenticator: Arc<dyn Authenticator>, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            authenticator,
            sessions: Arc::new(SessionCache::new(Duration::from_secs(300))),
            dialer,
        }
    }

    async fn negotiate(&self, stream: &mut NetStream) -> Result<()> {
        // A peer that authenticated recently skips straight past negotiation:
        // re-running a full challenge on every short-lived overlay stream
        // from the same already-trusted peer is pure overhead.
        if self.sessions.is_fresh(&stream.remote_peer_id) {
            return Ok(());
        }

        let body = stream.recv().await?.ok_or(Error::Closed)?;
        let req = NegotiationRequest::decode(&body)?;

        let method = if req.methods.contains(&METHOD_USER_PASS) {
            METHOD_USER_PASS
        } else if req.methods.contains(&METHOD_NO_AUTH) {
            METHOD_NO_AUTH
        } else {
            METHOD_NO_ACCEPTABLE
        };
        stream.send(&NegotiationReply { method }.encode()).await?;
        if method == METHOD_NO_ACCEPTABLE {
            return Err(Error::NoAcceptableMethod);
        }

        if method == METHOD_USER_PASS {
            let body = stream.recv().await?.ok_or(Error::Closed)?;
            let up = UserPassRequest::decode(&body)?;
            let ok = self.authenticator.authenticate(&up.username, up.token).await;
            stream
                .send(&UserPassReply { success: ok }.encode())
                .await?;
            if !ok {
                return Err(Error::AuthFailed);
            }
        }

        self.sessions.mark(stream.remote_peer_id);
        Ok(())
    }

    async fn resolve_target(addr: &Addr) -> Result<SocketAddr> {
        match addr {
            Addr::Ip(s) => Ok(*s),
            Addr::Domain(name, port) => {
                let mut addrs = tokio::net::lookup_host((name.as_str(), *port))
                    .await
                    .map_err(Error::Io)?;
                addrs.next().ok_or_else(|| Error::ConnectFailed(format!("no address for {name}")))
            }
        }
    }

    async fn serve(&self, mut stream: NetStream) -> Result<()> {
        self.negotiate(&mut stream).await?;

        let body = stream.recv().await?.ok_or(Error::Closed)?;
        let req = Request::decode(&body)?;

        match req.cmd {
            CMD_CONNECT => self.serve_connect(stream, req.addr).await,
            CMD_CONNECT_UDP => self.serve_connect_udp(stream, req.addr).await,
            CMD_PACKET_CONN => self.serve_packet_conn(stream).await,
            other => {
                let _ = stream.send(&Reply::error(REP_COMMAND_NOT_SUPPORTED).encode()).await;
                Err(Error::UnsupportedCommand(other))
            }
        }
    }

    async fn serve_connect(&self, mut stream: NetStream, addr: Addr) -> Result<()> {
        let target = match Self::resolve_target(&addr).await {
            Ok(t) => t,
            Err(_) => {
                stream.send(&Reply::error(REP_HOST_UNREACHABLE).encode()).await?;
                return Ok(());
            }
        };
        let conn = match tokio::time::timeout(CONNECT_TIMEOUT, self.dialer.dial(target)).await {
            Ok(Ok(conn)) => conn,
            _ => {
                stream.send(&Reply::error(REP_GENERAL_FAILURE).encode()).await?;
                return Ok(());
            }
        };
        stream.send(&Reply::success(target).encode()).await?;
        splice_stream(stream, conn).await;
        Ok(())
    }

    async fn serve_connect_udp(&self, mut stream: NetStream, addr: Addr) -> Result<()> {
        let target = match Self::resolve_target(&addr).await {
            Ok(t) => t,
            Err(_) => {
                stream.send(&Reply::error(REP_HOST_UNREACHABLE).encode()).await?;
                return Ok(());
            }
        };
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(s) => s,
            Err(_) => {
                stream.send(&Reply::error(REP_GENERAL_FAILURE).encode()).await?;
                return Ok(());
            }
        };
        if socket.connect(target).await.is_err() {
            stream.send(&Reply::error(REP_HOST_UNREACHABLE).encode()).await?;
            return Ok(());
        }
        stream.send(&Reply::success(target).encode()).await?;
        splice_udp_fixed(stream, socket).await;
        Ok(())
    }

    async fn serve_packet_conn(&self, mut stream: NetStream) -> Result<()> {
        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(s) => s,
            Err(_) => {
                stream.send(&Reply::error(REP_GENERAL_FAILURE).encode()).await?;
                return Ok(());
            }
        };
        let bound = socket.local_addr().map_err(Error::Io)?;
        stream.send(&Reply::success(bound).encode()).await?;
        splice_udp_packet_conn(stream, socket).await;
        Ok(())
    }
}

async fn splice_stream(mut stream: NetStream, mut conn: Box<dyn pierce_route::DialedStream>) {
    let mut buf = [0u8; 16 * 1024];
    loop {
        tokio::select! {
            res = conn.read(&mut buf) => {
                match res {
                    Ok(0) | Err(_) => break,
                    Ok(n) => if stream.send(&buf[..n]).await.is_err() { break },
                }
            }
            msg = stream.recv() => {
                match msg {
                    Ok(Some(data)) => if conn.write_all(&data).await.is_err() { break },
                    _ => break,
                }
            }
        }
    }
}

async fn splice_udp_fixed(mut stream: NetStream, socket: UdpSocket) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        tokio::select! {
            res = socket.recv(&mut buf) => {
                match res {
                    Ok(n) => if stream.send(&buf[..n]).await.is_err() { break },
                    Err(_) => break,
                }
            }
            msg = stream.recv() => {
                match msg {
                    Ok(Some(data)) => if socket.send(&data).await.is_err() { break },
                    _ => break,
                }
            }
        }
    }
}

async fn splice_udp_packet_conn(mut stream: NetStream, socket: UdpSocket) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        tokio::select! {
            res = tokio::time::timeout(PACKET_CONN_IDLE_TIMEOUT, socket.recv_from(&mut buf)) => {
                match res {
                    Ok(Ok((n, from))) => {
                        let frame = encode_packet_frame(&Addr::Ip(from), &buf[..n]);
                        if stream.send(&frame).await.is_err() { break }
                    }
                    Ok(Err(_)) | Err(_) => break,
                }
            }
            msg = stream.recv() => {
                match msg {
                    Ok(Some(data)) => {
                        let (addr, payload) = match decode_packet_frame(&data) {
                            Ok(ok) => ok,
                            Err(_) => continue,
                        };
                        let target = match Socks5GatewayHandler::resolve_target(&addr).await {
                            Ok(t) => t,
                            Err(_) => continue,
                        };
                        if socket.send_to(payload, target).await.is_err() { break }
                    }
                    _ => break,
                }
            }
        }
    }
}

#[async_trait]
impl StreamHandler for Socks5GatewayHandler {
    async fn handle(&self, stream: NetStream) {
        let peer = stream.remote_peer_id;
        if let Err(e) = self.serve(stream).await {
            debug!(%peer, error = %e, "socks5 gateway session ended");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TrialAuthenticator;
    use pierce_route::DirectDialer;

    #[tokio::test]
    async fn resolve_target_passes_through_an_ip_address() {
        let addr = Addr::Ip("1.2.3.4:80".parse().unwrap());
        let resolved = Socks5GatewayHandler::resolve_target(&addr).await.unwrap();
        assert_eq!(resolved, "1.2.3.4:80".parse().unwrap());
    }

    #[tokio::test]
    async fn resolve_target_resolves_localhost() {
        let addr = Addr::Domain("localhost".into(), 80);
        let resolved = Socks5GatewayHandler::resolve_target(&addr).await.unwrap();
        assert!(resolved.ip().is_loopback());
    }

    #[test]
    fn handler_construction_accepts_trait_objects() {
        let _handler = Socks5GatewayHandler::new(Arc::new(TrialAuthenticator), Arc::new(DirectDialer));
    }
}
