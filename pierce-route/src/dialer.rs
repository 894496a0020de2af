//! The pluggable outbound connector a route entry resolves to.

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A duplex byte stream a [`Dialer`] hands back on success. Implemented for
/// any type that is already both halves, so a plain `TcpStream` qualifies
/// with no wrapper.
pub trait DialedStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> DialedStream for T {}

/// Resolves a `SocketAddr` to an open connection. The default implementation
/// dials directly; a SOCKS5-upstream-chaining implementation
/// instead dials through a configured proxy.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, target: SocketAddr) -> std::io::Result<Box<dyn DialedStream>>;
}

/// Dial `target` directly with the host's network stack.
pub struct DirectDialer;

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, target: SocketAddr) -> std::io::Result<Box<dyn DialedStream>> {
        let stream = TcpStream::connect(target).await?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn direct_dialer_connects_to_a_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let _ = sock.write_all(b"hi").await;
        });
        let mut conn = DirectDialer.dial(addr).await.unwrap();
        let mut buf = [0u8; 2];
        tokio::io::AsyncReadExt::read_exact(&mut conn, &mut buf)
            .await
            .unwrap();
        assert_eq!(&buf, b"hi");
    }
}
