//! Reuse-port socket construction shared by the NAT probe and the tunnel
//! manager's hole-punch dialers, so both sides probe and punch from the
//! same local port.

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::{TcpSocket, UdpSocket};

use crate::errors::{Error, Result};

fn reuseport_socket(domain: Domain, ty: Type, proto: Option<Protocol>) -> Result<Socket> {
    let socket = Socket::new(domain, ty, proto)?;
    socket.set_reuse_address(true)?;
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Bind a UDP socket on `local_port` (0 = kernel-assigned) with
/// `SO_REUSEPORT` best-effort enabled, so a later punch can reuse the exact
/// port the NAT probe observed.
pub fn bind_reuseport_udp(local_port: u16) -> Result<UdpSocket> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), local_port);
    let socket = reuseport_socket(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.bind(&addr.into())?;
    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

/// Bind a TCP socket on `local_port` with `SO_REUSEPORT` best-effort enabled,
/// ready to either `connect` (outbound punch) or `listen` (inbound accept).
pub fn bind_reuseport_tcp(local_port: u16) -> Result<TcpSocket> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), local_port);
    let socket = reuseport_socket(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.bind(&addr.into())?;
    let tcp_socket = TcpSocket::from_std_stream(socket.into());
    Ok(tcp_socket)
}

/// The local port a just-bound UDP socket ended up on (useful when
/// `local_port` was 0).
pub fn local_udp_port(socket: &UdpSocket) -> Result<u16> {
    Ok(socket.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_udp_assigns_kernel_port_when_zero() {
        let sock = bind_reuseport_udp(0).expect("bind");
        assert_ne!(local_udp_port(&sock).unwrap(), 0);
    }

    #[tokio::test]
    async fn bind_tcp_assigns_kernel_port_when_zero() {
        let sock = bind_reuseport_tcp(0).expect("bind");
        let addr = sock.local_addr().expect("local_addr");
        assert_ne!(addr.port(), 0);
    }
}
