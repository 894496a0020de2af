//! Incremental byte-stream reads for the local SOCKS5 ingress, where the far
//! side is a standard SOCKS5 client (a browser, `curl --socks5`, ...)
//! speaking raw TCP rather than one of our own message-framed streams.
//! `crate::protocol`'s `encode`/`decode` pairs assume a whole message is
//! already in hand, which holds for the overlay hop (one [`pierce_net`]
//! message per step) but not here, where field lengths are only known after
//! reading a prefix.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{Error, Result};
use crate::protocol::{Addr, NegotiationRequest, Request, UserPassRequest, VERSION};

pub async fn read_negotiation_request<R: AsyncRead + Unpin>(r: &mut R) -> Result<NegotiationRequest> {
    let mut hdr = [0u8; 2];
    r.read_exact(&mut hdr).await?;
    if hdr[0] != VERSION {
        return Err(Error::Malformed(format!("unsupported socks version {}", hdr[0])));
    }
    let mut methods = vec![0u8; hdr[1] as usize];
    r.read_exact(&mut methods).await?;
    Ok(NegotiationRequest { methods })
}

pub async fn read_userpass_request<R: AsyncRead + Unpin>(r: &mut R) -> Result<UserPassRequest> {
    let mut hdr = [0u8; 2];
    r.read_exact(&mut hdr).await?;
    let mut username = vec![0u8; hdr[1] as usize];
    r.read_exact(&mut username).await?;
    let mut plen = [0u8; 1];
    r.read_exact(&mut plen).await?;
    if plen[0] != 8 {
        return Err(Error::Malformed("password must be 8 bytes".into()));
    }
    let mut token_bytes = [0u8; 8];
    r.read_exact(&mut token_bytes).await?;
    Ok(UserPassRequest {
        username,
        token: u64::from_le_bytes(token_bytes),
    })
}

async fn read_addr<R: AsyncRead + Unpin>(r: &mut R) -> Result<Addr> {
    let mut atyp = [0u8; 1];
    r.read_exact(&mut atyp).await?;
    match atyp[0] {
        crate::protocol::ATYP_IPV4 => {
            let mut buf = [0u8; 6];
            r.read_exact(&mut buf).await?;
            let ip = std::net::Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
            let port = u16::from_be_bytes([buf[4], buf[5]]);
            Ok(Addr::Ip(std::net::SocketAddr::new(ip.into(), port)))
        }
        crate::protocol::ATYP_IPV6 => {
            let mut buf = [0u8; 18];
            r.read_exact(&mut buf).await?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[..16]);
            let ip = std::net::Ipv6Addr::from(octets);
            let port = u16::from_be_bytes([buf[16], buf[17]]);
            Ok(Addr::Ip(std::net::SocketAddr::new(ip.into(), port)))
        }
        crate::protocol::ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            r.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            r.read_exact(&mut name).await?;
            let mut port_buf = [0u8; 2];
            r.read_exact(&mut port_buf).await?;
            let name = String::from_utf8(name).map_err(|e| Error::Malformed(e.to_string()))?;
            Ok(Addr::Domain(name, u16::from_be_bytes(port_buf)))
        }
        other => Err(Error::Malformed(format!("unknown ATYP {other}"))),
    }
}

pub async fn read_request<R: AsyncRead + Unpin>(r: &mut R) -> Result<Request> {
    let mut hdr = [0u8; 3];
    r.read_exact(&mut hdr).await?;
    if hdr[0] != VERSION {
        return Err(Error::Malformed(format!("unsupported socks version {}", hdr[0])));
    }
    let cmd = hdr[1];
    let addr = read_addr(r).await?;
    Ok(Request { cmd, addr })
}

pub async fn write_all<W: AsyncWrite + Unpin>(w: &mut W, buf: &[u8]) -> Result<()> {
    w.write_all(buf).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Reply, METHOD_NO_AUTH};
    use std::io::Cursor;

    #[tokio::test]
    async fn negotiation_request_reads_incrementally() {
        let encoded = NegotiationRequest {
            methods: vec![METHOD_NO_AUTH, 0x02],
        }
        .encode();
        let mut cursor = Cursor::new(encoded);
        let req = read_negotiation_request(&mut cursor).await.unwrap();
        assert_eq!(req.methods, vec![METHOD_NO_AUTH, 0x02]);
    }

    #[tokio::test]
    async fn request_with_domain_address_reads_incrementally() {
        let req = Request {
            cmd: crate::protocol::CMD_CONNECT,
            addr: Addr::Domain("example.org".into(), 443),
        };
        let mut cursor = Cursor::new(req.encode());
        let decoded = read_request(&mut cursor).await.unwrap();
        assert_eq!(decoded.addr, Addr::Domain("example.org".into(), 443));
    }

    #[tokio::test]
    async fn reply_still_encodes_as_one_shot_since_the_server_writes_it() {
        let reply = Reply::success("127.0.0.1:1080".parse().unwrap());
        let mut out = Vec::new();
        write_all(&mut out, &reply.encode()).await.unwrap();
        assert!(!out.is_empty());
    }
}
