//! SOCKS5 wire types (RFC 1928 plus the proprietary `CONNECT-UDP`/
//! `PACKET-CONN` extensions), hand-encoded since each negotiation step
//! rides as one message over a [`pierce_net::NetStream`] rather than a raw
//! byte socket.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::errors::{Error, Result};

pub const VERSION: u8 = 0x05;

pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_USER_PASS: u8 = 0x02;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

pub const CMD_CONNECT: u8 = 0x01;
pub const CMD_BIND: u8 = 0x02;
pub const CMD_UDP_ASSOCIATE: u8 = 0x03;
/// Proprietary extension: tunnels one UDP flow to a single
/// target over the stream.
pub const CMD_CONNECT_UDP: u8 = 0x04;
/// Proprietary extension: tunnels UDP datagrams to arbitrary
/// targets, address carried per-frame.
pub const CMD_PACKET_CONN: u8 = 0x05;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

pub const REP_SUCCESS: u8 = 0x00;
pub const REP_GENERAL_FAILURE: u8 = 0x01;
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ADDRESS_NOT_SUPPORTED: u8 = 0x08;

pub const USER_PASS_VERSION: u8 = 0x01;
pub const USER_PASS_SUCCESS: u8 = 0x00;
pub const USER_PASS_FAILURE: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addr {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl Addr {
    pub fn port(&self) -> u16 {
        match self {
            Addr::Ip(s) => s.port(),
            Addr::Domain(_, p) => *p,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Addr::Ip(SocketAddr::V4(s)) => {
                out.push(ATYP_IPV4);
                out.extend_from_slice(&s.ip().octets());
                out.extend_from_slice(&s.port().to_be_bytes());
            }
            Addr::Ip(SocketAddr::V6(s)) => {
                out.push(ATYP_IPV6);
                out.extend_from_slice(&s.ip().octets());
                out.extend_from_slice(&s.port().to_be_bytes());
            }
            Addr::Domain(name, port) => {
                out.push(ATYP_DOMAIN);
                out.push(name.len() as u8);
                out.extend_from_slice(name.as_bytes());
                out.extend_from_slice(&port.to_be_bytes());
            }
        }
    }

    /// Decode one address from the front of `buf`, returning the address and
    /// the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let atyp = *buf.first().ok_or(Error::Truncated)?;
        let rest = &buf[1..];
        match atyp {
            ATYP_IPV4 => {
                if rest.len() < 6 {
                    return Err(Error::Truncated);
                }
                let ip = Ipv4Addr::new(rest[0], rest[1], rest[2], rest[3]);
                let port = u16::from_be_bytes([rest[4], rest[5]]);
                Ok((Addr::Ip(SocketAddr::new(ip.into(), port)), 1 + 6))
            }
            ATYP_IPV6 => {
                if rest.len() < 18 {
                    return Err(Error::Truncated);
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&rest[..16]);
                let ip = Ipv6Addr::from(octets);
                let port = u16::from_be_bytes([rest[16], rest[17]]);
                Ok((Addr::Ip(SocketAddr::new(ip.into(), port)), 1 + 18))
            }
            ATYP_DOMAIN => {
                let len = *rest.first().ok_or(Error::Truncated)? as usize;
                if rest.len() < 1 + len + 2 {
                    return Err(Error::Truncated);
                }
                let name = String::from_utf8(rest[1..1 + len].to_vec())
                    .map_err(|e| Error::Malformed(e.to_string()))?;
                let port_off = 1 + len;
                let port = u16::from_be_bytes([rest[port_off], rest[port_off + 1]]);
                Ok((Addr::Domain(name, port), 1 + 1 + len + 2))
            }
            other => Err(Error::Malformed(format!("unknown ATYP {other}"))),
        }
    }

    pub fn to_host_string(&self) -> String {
        match self {
            Addr::Ip(SocketAddr::V4(s)) => s.ip().to_string(),
            Addr::Ip(SocketAddr::V6(s)) => s.ip().to_string(),
            Addr::Domain(name, _) => name.clone(),
        }
    }
}

/// Client's method-negotiation request (`VER | NMETHODS | METHODS...`).
pub struct NegotiationRequest {
    pub methods: Vec<u8>,
}

impl NegotiationRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![VERSION, self.methods.len() as u8];
        out.extend_from_slice(&self.methods);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 || buf[0] != VERSION {
            return Err(Error::Malformed("bad negotiation request".into()));
        }
        let n = buf[1] as usize;
        if buf.len() < 2 + n {
            return Err(Error::Truncated);
        }
        Ok(Self {
            methods: buf[2..2 + n].to_vec(),
        })
    }
}

/// Server's method choice (`VER | METHOD`).
pub struct NegotiationReply {
    pub method: u8,
}

impl NegotiationReply {
    pub fn encode(&self) -> Vec<u8> {
        vec![VERSION, self.method]
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != 2 || buf[0] != VERSION {
            return Err(Error::Malformed("bad negotiation reply".into()));
        }
        Ok(Self { method: buf[1] })
    }
}

/// Username/password sub-negotiation request (RFC 1929); the
/// password is always 8 little-endian bytes encoding a `u64` token.
pub struct UserPassRequest {
    pub username: Vec<u8>,
    pub token: u64,
}

impl UserPassRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![USER_PASS_VERSION, self.username.len() as u8];
        out.extend_from_slice(&self.username);
        out.push(8);
        out.extend_from_slice(&self.token.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(Error::Truncated);
        }
        let ulen = buf[1] as usize;
        if buf.len() < 2 + ulen + 1 {
            return Err(Error::Truncated);
        }
        let username = buf[2..2 + ulen].to_vec();
        let plen = buf[2 + ulen] as usize;
        if plen != 8 || buf.len() < 2 + ulen + 1 + 8 {
            return Err(Error::Malformed("password must be 8 bytes".into()));
        }
        let pass_off = 2 + ulen + 1;
        let token = u64::from_le_bytes(buf[pass_off..pass_off + 8].try_into().expect("checked len"));
        Ok(Self { username, token })
    }
}

pub struct UserPassReply {
    pub success: bool,
}

impl UserPassReply {
    pub fn encode(&self) -> Vec<u8> {
        vec![
            USER_PASS_VERSION,
            if self.success {
                USER_PASS_SUCCESS
            } else {
                USER_PASS_FAILURE
            },
        ]
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != 2 {
            return Err(Error::Truncated);
        }
        Ok(Self {
            success: buf[1] == USER_PASS_SUCCESS,
        })
    }
}

/// Client request (`VER | CMD | RSV | ATYP | ADDR | PORT`).
pub struct Request {
    pub cmd: u8,
    pub addr: Addr,
}

impl Request {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![VERSION, self.cmd, 0x00];
        self.addr.encode(&mut out);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 4 || buf[0] != VERSION {
            return Err(Error::Malformed("bad request".into()));
        }
        let cmd = buf[1];
        let (addr, _) = Addr::decode(&buf[3..])?;
        Ok(Self { cmd, addr })
    }
}

/// Server reply (`VER | REP | RSV | ATYP | BNDADDR | BNDPORT`).
pub struct Reply {
    pub rep: u8,
    pub bind_addr: SocketAddr,
}

impl Reply {
    pub fn success(bind_addr: SocketAddr) -> Self {
        Self {
            rep: REP_SUCCESS,
            bind_addr,
        }
    }

    pub fn error(rep: u8) -> Self {
        Self {
            rep,
            bind_addr: SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![VERSION, self.rep, 0x00];
        Addr::Ip(self.bind_addr).encode(&mut out);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 4 || buf[0] != VERSION {
            return Err(Error::Malformed("bad reply".into()));
        }
        let rep = buf[1];
        let (addr, _) = Addr::decode(&buf[3..])?;
        let bind_addr = match addr {
            Addr::Ip(s) => s,
            Addr::Domain(..) => return Err(Error::Malformed("reply bound a domain address".into())),
        };
        Ok(Self { rep, bind_addr })
    }

    pub fn is_success(&self) -> bool {
        self.rep == REP_SUCCESS
    }
}

/// Encode a `PACKET-CONN` frame: `ATYP | ADDR | PORT | payload`, the RFC
/// 1928 UDP-request format minus the RSV/FRAG prefix — message framing
/// already delimits each datagram here, so there is no length prefix to
/// carry in addition to the stream's own frame boundary.
pub fn encode_packet_frame(addr: &Addr, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + payload.len());
    addr.encode(&mut out);
    out.extend_from_slice(payload);
    out
}

pub fn decode_packet_frame(buf: &[u8]) -> Result<(Addr, &[u8])> {
    let (addr, consumed) = Addr::decode(buf)?;
    Ok((addr, &buf[consumed..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_addr_round_trips() {
        let addr = Addr::Ip("1.2.3.4:80".parse().unwrap());
        let mut buf = Vec::new();
        addr.encode(&mut buf);
        let (decoded, consumed) = Addr::decode(&buf).unwrap();
        assert_eq!(decoded, addr);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn domain_addr_round_trips() {
        let addr = Addr::Domain("example.org".to_string(), 443);
        let mut buf = Vec::new();
        addr.encode(&mut buf);
        let (decoded, consumed) = Addr::decode(&buf).unwrap();
        assert_eq!(decoded, addr);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn user_pass_request_round_trips_a_u64_token() {
        let req = UserPassRequest {
            username: b"anything".to_vec(),
            token: 0xDEAD_BEEF_CAFE_BABE,
        };
        let encoded = req.encode();
        let decoded = UserPassRequest::decode(&encoded).unwrap();
        assert_eq!(decoded.token, 0xDEAD_BEEF_CAFE_BABE);
    }

    #[test]
    fn packet_frame_round_trips_addr_and_payload() {
        let addr = Addr::Ip("8.8.8.8:53".parse().unwrap());
        let frame = encode_packet_frame(&addr, b"hello");
        let (decoded, payload) = decode_packet_frame(&frame).unwrap();
        assert_eq!(decoded, addr);
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn truncated_negotiation_request_is_rejected() {
        assert!(NegotiationRequest::decode(&[VERSION, 5, 0, 2]).is_err());
    }
}
