//! Datagram framing for the `CONNECT-UDP`/`PACKET-CONN` extensions: a `u16`
//! big-endian length prefix wraps each datagram on the control TCP
//! connection for `CONNECT-UDP`, while `PACKET-CONN` additionally needs the
//! `ATYP|ADDR|PORT|payload` framing since, unlike `CONNECT-UDP`, its target
//! varies per datagram.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{Error, Result};
use crate::protocol::{decode_packet_frame, encode_packet_frame, Addr};

pub const MAX_DATAGRAM_LEN: usize = 64 * 1024;

/// Read one `u16`-length-prefixed datagram from the control connection.
pub async fn read_datagram<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 2];
    r.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write one `u16`-length-prefixed datagram to the control connection.
pub async fn write_datagram<W: AsyncWrite + Unpin>(w: &mut W, payload: &[u8]) -> Result<()> {
    let len = u16::try_from(payload.len()).map_err(|_| Error::Malformed("datagram too large".into()))?;
    w.write_all(&len.to_be_bytes()).await?;
    w.write_all(payload).await?;
    Ok(())
}

/// `PACKET-CONN` wraps an `Addr|payload` frame inside the same length-prefix
/// envelope `CONNECT-UDP` uses for its fixed-target payloads.
pub async fn read_packet_conn_datagram<R: AsyncRead + Unpin>(r: &mut R) -> Result<(Addr, Vec<u8>)> {
    let framed = read_datagram(r).await?;
    let (addr, payload) = decode_packet_frame(&framed)?;
    Ok((addr, payload.to_vec()))
}

pub async fn write_packet_conn_datagram<W: AsyncWrite + Unpin>(
    w: &mut W,
    addr: &Addr,
    payload: &[u8],
) -> Result<()> {
    let framed = encode_packet_frame(addr, payload);
    write_datagram(w, &framed).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn datagram_round_trips_through_the_length_prefix() {
        let mut buf = Vec::new();
        write_datagram(&mut buf, b"hello world").await.unwrap();
        let mut cursor = Cursor::new(buf);
        let out = read_datagram(&mut cursor).await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn packet_conn_datagram_round_trips_addr_and_payload() {
        let addr = Addr::Ip("1.2.3.4:53".parse().unwrap());
        let mut buf = Vec::new();
        write_packet_conn_datagram(&mut buf, &addr, b"dns query").await.unwrap();
        let mut cursor = Cursor::new(buf);
        let (decoded_addr, payload) = read_packet_conn_datagram(&mut cursor).await.unwrap();
        assert_eq!(decoded_addr, addr);
        assert_eq!(payload, b"dns query");
    }

    #[tokio::test]
    async fn oversized_datagram_is_rejected_on_write() {
        let oversized = vec![0u8; MAX_DATAGRAM_LEN + 1];
        let mut buf = Vec::new();
        assert!(write_datagram(&mut buf, &oversized).await.is_err());
    }
}
