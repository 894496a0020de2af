//! NAT classification.
//!
//! `classify` runs the two-probe algorithm against a pair of ports on a
//! known test host (typically hosted alongside the rendezvous service, see
//! [`serve_echo`] for the responder side) and additionally measures whether
//! this node's public address is reachable on its own desired public port
//! ("exclusive public IPv4").

use pierce_core::NatType;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::dial::bind_reuseport_udp;
use crate::errors::{Error, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const SELF_TEST_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub test_host: IpAddr,
    pub port1: u16,
    pub port2: u16,
    /// Desired public port for the exclusivity self-test.
    pub desired_public_port: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NatInfo {
    pub nat_type: NatType,
    pub public_ip: IpAddr,
    pub public_port: u16,
    pub local_port: u16,
    pub exclusive_public_ipv4: bool,
}

/// One probe round: dial `(test_host, port)` from `local_port` (or a fresh
/// ephemeral port if `local_port == 0`) and parse the echoed observed
/// address back out of the response.
async fn probe_once(test_host: IpAddr, port: u16, local_port: u16) -> Result<(SocketAddr, u16)> {
    let socket = bind_reuseport_udp(local_port)?;
    let bound_port = socket.local_addr()?.port();
    let dest = SocketAddr::new(test_host, port);
    socket.connect(dest).await?;
    socket.send(b"hello").await?;

    let mut buf = [0u8; 128];
    let n = timeout(PROBE_TIMEOUT, socket.recv(&mut buf))
        .await
        .map_err(|_| Error::Timeout(format!("probe to {dest} timed out")))??;

    let text = std::str::from_utf8(&buf[..n])
        .map_err(|e| Error::MalformedResponse(e.to_string()))?;
    let observed: SocketAddr = text
        .trim()
        .parse()
        .map_err(|e| Error::MalformedResponse(format!("{text:?}: {e}")))?;
    Ok((observed, bound_port))
}

/// Check whether `public_ip:desired_public_port` is reachable from the
/// outside by bouncing a self-addressed datagram off a short-lived local
/// echo responder.
async fn exclusive_public_ipv4_test(public_ip: IpAddr, desired_public_port: u16) -> bool {
    let responder = match bind_reuseport_udp(desired_public_port) {
        Ok(s) => s,
        Err(e) => {
            warn!("exclusivity self-test: bind failed: {e}");
            return false;
        }
    };
    let local_port = match responder.local_addr() {
        Ok(a) => a.port(),
        Err(_) => return false,
    };

    let responder_task = tokio::spawn(async move {
        let mut buf = [0u8; 64];
        if let Ok(Ok((n, from))) =
            timeout(SELF_TEST_TIMEOUT, responder.recv_from(&mut buf)).await
        {
            let _ = responder.send_to(&buf[..n], from).await;
        }
    });

    let prober = match bind_reuseport_udp(0) {
        Ok(s) => s,
        Err(_) => {
            responder_task.abort();
            return false;
        }
    };
    let dest = SocketAddr::new(public_ip, local_port);
    let sent = prober.send_to(b"x", dest).await.is_ok();
    if !sent {
        responder_task.abort();
        return false;
    }
    let mut buf = [0u8; 64];
    let ok = timeout(SELF_TEST_TIMEOUT, prober.recv(&mut buf)).await.is_ok();
    let _ = responder_task.await;
    ok
}

/// Classify this node's NAT behavior.
pub async fn classify(cfg: &ProbeConfig) -> Result<NatInfo> {
    let (addr1, local_port) = probe_once(cfg.test_host, cfg.port1, 0).await?;
    debug!(%addr1, local_port, "nat probe 1 complete");

    let exclusive =
        exclusive_public_ipv4_test(addr1.ip(), cfg.desired_public_port).await;

    let (addr2, _) = probe_once(cfg.test_host, cfg.port2, local_port).await?;
    debug!(%addr2, "nat probe 2 complete");

    let nat_type = if addr1.ip() != addr2.ip() {
        NatType::Unknown
    } else if addr1.port() == addr2.port() {
        NatType::Cone
    } else {
        NatType::Symmetric
    };

    Ok(NatInfo {
        nat_type,
        public_ip: addr1.ip(),
        public_port: addr1.port(),
        local_port,
        exclusive_public_ipv4: exclusive,
    })
}

/// Run the server half of the probe: reply to every datagram with the
/// sender's observed address, rendered as text.
pub async fn serve_echo(bind_addr: SocketAddr) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(bind_addr).await?;
    Ok(socket)
}

/// Drive one iteration of the echo responder loop started by [`serve_echo`].
/// Split out from `serve_echo` so callers can own the accept loop's
/// lifetime (spawn it, select! on a shutdown signal, etc).
pub async fn echo_once(socket: &UdpSocket) -> Result<()> {
    let mut buf = [0u8; 1024];
    let (n, from) = socket.recv_from(&mut buf).await?;
    let _ = (n, from);
    let reply = from.to_string();
    socket.send_to(reply.as_bytes(), from).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket as TokioUdp;

    async fn spawn_echo_server() -> SocketAddr {
        let socket = TokioUdp::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                if echo_once(&socket).await.is_err() {
                    break;
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn cone_nat_when_both_probes_see_same_port() {
        let server = spawn_echo_server().await;
        let cfg = ProbeConfig {
            test_host: server.ip(),
            port1: server.port(),
            port2: server.port(),
            desired_public_port: 0,
        };
        let info = classify(&cfg).await.expect("classify");
        assert_eq!(info.nat_type, NatType::Cone);
    }

    #[tokio::test]
    async fn probe_to_closed_port_times_out() {
        let cfg = ProbeConfig {
            test_host: "127.0.0.1".parse().unwrap(),
            port1: 1,
            port2: 1,
            desired_public_port: 0,
        };
        let res = tokio::time::timeout(Duration::from_secs(6), classify(&cfg)).await;
        match res {
            Ok(Err(_)) => {}
            Ok(Ok(_)) => panic!("expected failure against a closed port"),
            Err(_) => panic!("classify itself should time out internally, not hang the test"),
        }
    }
}
