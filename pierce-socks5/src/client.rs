//! The overlay-facing half of SOCKS5: a [`pierce_route::Dialer`]
//! that reaches a remote gateway's [`crate::server::Socks5GatewayHandler`]
//! over the overlay transport, plus a plain local SOCKS5 listener that real
//! local applications point their SOCKS5 configuration at.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use pierce_crypto::identity::PeerId;
use pierce_net::{Host, NetStream};
use pierce_route::{DialedStream, Dialer, RouteTable};

use crate::auth::Authenticator;
use crate::errors::{Error, Result};
use crate::io::{read_negotiation_request, read_request};
use crate::protocol::{
    Addr, NegotiationReply, NegotiationRequest, Reply, Request, UserPassReply, UserPassRequest,
    CMD_CONNECT, CMD_CONNECT_UDP, CMD_PACKET_CONN, METHOD_USER_PASS, REP_COMMAND_NOT_SUPPORTED,
    REP_GENERAL_FAILURE,
};
use crate::udp::{read_datagram, read_packet_conn_datagram, write_datagram, write_packet_conn_datagram};

/// Dials a remote SOCKS5 gateway peer over the overlay and authenticates
/// with a fixed `(username, token)` pair.
pub struct SocksDialer {
    host: Arc<Host>,
    gateway: PeerId,
    username: Vec<u8>,
    token: u64,
}

impl SocksDialer {
    pub fn new(host: Arc<Host>, gateway: PeerId, username: Vec<u8>, token: u64) -> Self {
        Self {
            host,
            gateway,
            username,
            token,
        }
    }

    async fn open_and_authenticate(&self) -> Result<NetStream> {
        let addr = self
            .host
            .peers()
            .get(&self.gateway)
            .ok_or_else(|| Error::ConnectFailed(format!("unknown gateway peer {}", self.gateway)))?;
        let mut stream = self
            .host
            .dial(addr, pierce_net::protocol::SOCKS5)
            .await
            .map_err(Error::Net)?;

        stream
            .send(&NegotiationRequest { methods: vec![METHOD_USER_PASS] }.encode())
            .await
            .map_err(Error::Net)?;
        let body = stream.recv().await.map_err(Error::Net)?.ok_or(Error::Closed)?;
        let reply = NegotiationReply::decode(&body)?;
        if reply.method != METHOD_USER_PASS {
            return Err(Error::NoAcceptableMethod);
        }

        stream
            .send(
                &UserPassRequest {
                    username: self.username.clone(),
                    token: self.token,
                }
                .encode(),
            )
            .await
            .map_err(Error::Net)?;
        let body = stream.recv().await.map_err(Error::Net)?.ok_or(Error::Closed)?;
        if !UserPassReply::decode(&body)?.success {
            return Err(Error::AuthFailed);
        }

        Ok(stream)
    }

    async fn request(&self, mut stream: NetStream, cmd: u8, addr: Addr) -> Result<NetStream> {
        stream.send(&Request { cmd, addr }.encode()).await.map_err(Error::Net)?;
        let body = stream.recv().await.map_err(Error::Net)?.ok_or(Error::Closed)?;
        let reply = Reply::decode(&body)?;
        if !reply.is_success() {
            return Err(Error::ConnectFailed(format!("gateway replied {:#x}", reply.rep)));
        }
        Ok(stream)
    }

    /// Open a `CONNECT-UDP` tunnel fixed to `target`.
    pub async fn connect_udp(&self, target: SocketAddr) -> Result<NetStream> {
        let stream = self.open_and_authenticate().await?;
        self.request(stream, CMD_CONNECT_UDP, Addr::Ip(target)).await
    }

    /// Open a `PACKET-CONN` tunnel whose target varies per datagram.
    pub async fn packet_conn(&self) -> Result<NetStream> {
        let stream = self.open_and_authenticate().await?;
        self.request(stream, CMD_PACKET_CONN, Addr::Ip("0.0.0.0:0".parse().expect("valid")))
            .await
    }
}

#[async_trait]
impl Dialer for SocksDialer {
    async fn dial(&self, target: SocketAddr) -> std::io::Result<Box<dyn DialedStream>> {
        let opened = self
            .open_and_authenticate()
            .await
            .map_err(std::io::Error::other)?;
        let stream = self
            .request(opened, CMD_CONNECT, Addr::Ip(target))
            .await
            .map_err(std::io::Error::other)?;

        let (local, remote) = tokio::io::duplex(64 * 1024);
        tokio::spawn(pump(stream, remote));
        Ok(Box::new(local))
    }
}

async fn pump<S: AsyncRead + AsyncWrite + Unpin>(mut stream: NetStream, mut local: S) {
    let mut buf = [0u8; 16 * 1024];
    loop {
        tokio::select! {
            res = local.read(&mut buf) => {
                match res {
                    Ok(0) | Err(_) => break,
                    Ok(n) => if stream.send(&buf[..n]).await.is_err() { break },
                }
            }
            msg = stream.recv() => {
                match msg {
                    Ok(Some(data)) => if local.write_all(&data).await.is_err() { break },
                    _ => break,
                }
            }
        }
    }
}

/// The local, real-SOCKS5-protocol listener applications point at as their
/// ingress. Each accepted connection is routed through
/// [`RouteTable`] (falling back to `default_dialer`) to decide which
/// [`Dialer`] carries its `CONNECT` traffic, and — when `udp_gateway` is
/// configured — `CONNECT-UDP`/`PACKET-CONN` always ride that one overlay
/// gateway, since those extensions only make sense tunneled through a peer.
pub struct Socks5LocalListener {
    authenticator: Arc<dyn Authenticator>,
    routes: Option<Arc<RouteTable>>,
    default_dialer: Arc<dyn Dialer>,
    udp_gateway: Option<Arc<SocksDialer>>,
}

impl Socks5LocalListener {
    pub fn new(authenticator: Arc<dyn Authenticator>, default_dialer: Arc<dyn Dialer>) -> Self {
        Self {
            authenticator,
            routes: None,
            default_dialer,
            udp_gateway: None,
        }
    }

    pub fn with_routes(mut self, routes: Arc<RouteTable>) -> Self {
        self.routes = Some(routes);
        self
    }

    pub fn with_udp_gateway(mut self, gateway: Arc<SocksDialer>) -> Self {
        self.udp_gateway = Some(gateway);
        self
    }

    pub async fn run(self: Arc<Self>, bind_addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(bind_addr).await?;
        debug!(%bind_addr, "socks5 local listener bound");
        loop {
            let (socket, peer_addr) = listener.accept().await?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.serve(socket).await {
                    debug!(%peer_addr, error = %e, "socks5 local session ended");
                }
            });
        }
    }

    async fn serve(&self, mut socket: TcpStream) -> Result<()> {
        let neg = read_negotiation_request(&mut socket).await?;
        let method = if neg.methods.contains(&crate::protocol::METHOD_NO_AUTH) {
            crate::protocol::METHOD_NO_AUTH
        } else {
            crate::protocol::METHOD_NO_ACCEPTABLE
        };
        socket
            .write_all(&NegotiationReply { method }.encode())
            .await?;
        if method == crate::protocol::METHOD_NO_ACCEPTABLE {
            return Err(Error::NoAcceptableMethod);
        }
        if !self.authenticator.authenticate(b"local", 0).await {
            return Err(Error::AuthFailed);
        }

        let req = read_request(&mut socket).await?;
        match req.cmd {
            CMD_CONNECT => self.serve_connect(socket, req.addr).await,
            CMD_CONNECT_UDP => self.serve_connect_udp(socket, req.addr).await,
            CMD_PACKET_CONN => self.serve_packet_conn(socket).await,
            other => {
                socket
                    .write_all(&Reply::error(REP_COMMAND_NOT_SUPPORTED).encode())
                    .await?;
                Err(Error::UnsupportedCommand(other))
            }
        }
    }

    fn pick_dialer(&self, ip: std::net::Ipv4Addr) -> Arc<dyn Dialer> {
        self.routes
            .as_ref()
            .and_then(|t| t.get(u32::from(ip)))
            .unwrap_or_else(|| self.default_dialer.clone())
    }

    async fn resolve(addr: &Addr) -> Result<SocketAddr> {
        match addr {
            Addr::Ip(s) => Ok(*s),
            Addr::Domain(name, port) => tokio::net::lookup_host((name.as_str(), *port))
                .await?
                .next()
                .ok_or_else(|| Error::ConnectFailed(format!("no address for {name}"))),
        }
    }

    async fn serve_connect(&self, mut socket: TcpStream, addr: Addr) -> Result<()> {
        let target = Self::resolve(&addr).await?;
        let dialer = match target {
            SocketAddr::V4(v4) => self.pick_dialer(*v4.ip()),
            SocketAddr::V6(_) => self.default_dialer.clone(),
        };
        let mut conn = match dialer.dial(target).await {
            Ok(c) => c,
            Err(e) => {
                warn!(%target, error = %e, "socks5 upstream connect failed");
                socket.write_all(&Reply::error(REP_GENERAL_FAILURE).encode()).await?;
                return Ok(());
            }
        };
        socket.write_all(&Reply::success(target).encode()).await?;
        let _ = tokio::io::copy_bidirectional(&mut socket, &mut *conn).await;
        Ok(())
    }

    async fn serve_connect_udp(&self, mut socket: TcpStream, addr: Addr) -> Result<()> {
        let Some(gateway) = &self.udp_gateway else {
            socket.write_all(&Reply::error(REP_COMMAND_NOT_SUPPORTED).encode()).await?;
            return Err(Error::UnsupportedCommand(CMD_CONNECT_UDP));
        };
        let target = Self::resolve(&addr).await?;
        let mut stream = gateway.connect_udp(target).await?;
        socket.write_all(&Reply::success(target).encode()).await?;
        loop {
            tokio::select! {
                datagram = read_datagram(&mut socket) => {
                    match datagram {
                        Ok(d) => if stream.send(&d).await.is_err() { break },
                        Err(_) => break,
                    }
                }
                msg = stream.recv() => {
                    match msg {
                        Ok(Some(data)) => if write_datagram(&mut socket, &data).await.is_err() { break },
                        _ => break,
                    }
                }
            }
        }
        Ok(())
    }

    async fn serve_packet_conn(&self, mut socket: TcpStream) -> Result<()> {
        let Some(gateway) = &self.udp_gateway else {
            socket.write_all(&Reply::error(REP_COMMAND_NOT_SUPPORTED).encode()).await?;
            return Err(Error::UnsupportedCommand(CMD_PACKET_CONN));
        };
        let mut stream = gateway.packet_conn().await?;
        socket
            .write_all(&Reply::success("0.0.0.0:0".parse().expect("valid")).encode())
            .await?;
        loop {
            tokio::select! {
                datagram = read_packet_conn_datagram(&mut socket) => {
                    match datagram {
                        Ok((addr, payload)) => {
                            let frame = crate::protocol::encode_packet_frame(&addr, &payload);
                            if stream.send(&frame).await.is_err() { break }
                        }
                        Err(_) => break,
                    }
                }
                msg = stream.recv() => {
                    match msg {
                        Ok(Some(data)) => {
                            let (addr, payload) = match crate::protocol::decode_packet_frame(&data) {
                                Ok(ok) => ok,
                                Err(_) => continue,
                            };
                            if write_packet_conn_datagram(&mut socket, &addr, payload).await.is_err() {
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TrialAuthenticator;
    use pierce_route::DirectDialer;
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt as _;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_flows_end_to_end_through_the_direct_dialer() {
        let echo = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = echo.accept().await.unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let listener = Arc::new(Socks5LocalListener::new(
            Arc::new(TrialAuthenticator),
            Arc::new(DirectDialer),
        ));
        let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let tcp = TcpListener::bind(bind_addr).await.unwrap();
        let bound = tcp.local_addr().unwrap();
        drop(tcp);
        let listener_clone = listener.clone();
        tokio::spawn(async move {
            let _ = listener_clone.run(bound).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut client = TcpStream::connect(bound).await.unwrap();
        client
            .write_all(&NegotiationRequest { methods: vec![crate::protocol::METHOD_NO_AUTH] }.encode())
            .await
            .unwrap();
        let mut reply_buf = [0u8; 2];
        client.read_exact(&mut reply_buf).await.unwrap();
        assert_eq!(reply_buf[1], crate::protocol::METHOD_NO_AUTH);

        client
            .write_all(&Request { cmd: CMD_CONNECT, addr: Addr::Ip(echo_addr) }.encode())
            .await
            .unwrap();
        let mut hdr = [0u8; 4];
        client.read_exact(&mut hdr).await.unwrap();
        assert_eq!(hdr[1], crate::protocol::REP_SUCCESS);
        let mut rest = [0u8; 6];
        client.read_exact(&mut rest).await.unwrap();

        client.write_all(b"hello").await.unwrap();
        let mut echoed = [0u8; 5];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"hello");
    }
}
