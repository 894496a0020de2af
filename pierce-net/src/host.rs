//! Multiplexed authenticated transport host.
//!
//! `Host` owns one TCP listener and a registry of named-protocol handlers:
//! one TCP listener fans inbound connections out to whichever handler is
//! registered for the protocol the dialer asked for.

use async_trait::async_trait;
use dashmap::DashMap;
use ed25519_dalek::SigningKey;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use pierce_crypto::identity::{Identity, PeerId};

use crate::errors::{Error, Result};
use crate::handshake::{run_dialer, run_listener};
use crate::peerstore::PeerStore;
use crate::protocol::ProtocolId;
use crate::stream::NetStream;

/// Handles one accepted, authenticated stream for a single registered
/// protocol.
#[async_trait]
pub trait StreamHandler: Send + Sync + 'static {
    async fn handle(&self, stream: NetStream);
}

async fn write_protocol_preamble<S: AsyncWriteExt + Unpin>(
    stream: &mut S,
    protocol: &ProtocolId,
) -> Result<()> {
    let bytes = protocol.as_str().as_bytes();
    let len = u16::try_from(bytes.len())
        .map_err(|_| Error::Handshake("protocol id too long".into()))?;
    stream.write_u16(len).await.map_err(Error::Io)?;
    stream.write_all(bytes).await.map_err(Error::Io)?;
    Ok(())
}

async fn read_protocol_preamble<S: AsyncReadExt + Unpin>(stream: &mut S) -> Result<ProtocolId> {
    let len = stream.read_u16().await.map_err(Error::Io)? as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await.map_err(Error::Io)?;
    let s = String::from_utf8(buf).map_err(|e| Error::Handshake(e.to_string()))?;
    Ok(ProtocolId::new(s))
}

pub struct Host {
    identity: Arc<Identity>,
    signing_key: SigningKey,
    handlers: DashMap<ProtocolId, Arc<dyn StreamHandler>>,
    peers: Arc<PeerStore>,
}

impl Host {
    pub fn new(signing_key: SigningKey) -> Self {
        let identity = Arc::new(Identity::from_seed(&signing_key.to_bytes()));
        Self {
            identity,
            signing_key,
            handlers: DashMap::new(),
            peers: Arc::new(PeerStore::new()),
        }
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.identity.peer_id()
    }

    pub fn peers(&self) -> Arc<PeerStore> {
        self.peers.clone()
    }

    pub fn register_handler(&self, protocol: impl Into<ProtocolId>, handler: Arc<dyn StreamHandler>) {
        self.handlers.insert(protocol.into(), handler);
    }

    /// Bind and run the accept loop until the listener errors out.
    pub async fn listen(self: &Arc<Self>, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await.map_err(Error::Io)?;
        debug!(%addr, "pierce-net host listening");
        loop {
            let (socket, peer_addr) = listener.accept().await.map_err(Error::Io)?;
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.accept_one(socket).await {
                    warn!(%peer_addr, error = %e, "inbound connection rejected");
                }
            });
        }
    }

    async fn accept_one(self: &Arc<Self>, mut socket: TcpStream) -> Result<()> {
        let protocol = read_protocol_preamble(&mut socket).await?;
        let handler = self
            .handlers
            .get(&protocol)
            .map(|h| h.clone())
            .ok_or_else(|| Error::UnknownProtocol(protocol.to_string()))?;

        let out = run_listener(&mut socket, &self.signing_key).await?;
        self.peers
            .insert(out.remote_peer_id, socket.peer_addr().map_err(Error::Io)?);

        let stream = NetStream::new(
            socket,
            out.tx,
            out.rx,
            protocol,
            out.remote_peer_id,
            out.remote_public_key,
        );
        handler.handle(stream).await;
        Ok(())
    }

    /// Dial `addr`, negotiate `protocol`, and run the authenticated
    /// handshake, returning an open stream ready for application traffic.
    pub async fn dial(&self, addr: SocketAddr, protocol: impl Into<ProtocolId>) -> Result<NetStream> {
        let protocol = protocol.into();
        let mut socket = TcpStream::connect(addr).await.map_err(Error::Io)?;
        write_protocol_preamble(&mut socket, &protocol).await?;
        let out = run_dialer(&mut socket, &self.signing_key).await?;
        self.peers.insert(out.remote_peer_id, addr);
        Ok(NetStream::new(
            socket,
            out.tx,
            out.rx,
            protocol,
            out.remote_peer_id,
            out.remote_public_key,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl StreamHandler for Echo {
        async fn handle(&self, mut stream: NetStream) {
            while let Ok(Some(msg)) = stream.recv().await {
                if stream.send(&msg).await.is_err() {
                    break;
                }
            }
        }
    }

    #[tokio::test]
    async fn dial_and_handler_round_trip_through_aead() {
        let server = Arc::new(Host::new(SigningKey::from_bytes(&[10u8; 32])));
        server.register_handler(ProtocolId::new("/test/echo/1.0.0"), Arc::new(Echo));

        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(addr).await.unwrap();
        let bound = listener.local_addr().unwrap();
        drop(listener);

        let server_clone = server.clone();
        tokio::spawn(async move {
            let _ = server_clone.listen(bound).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = Host::new(SigningKey::from_bytes(&[11u8; 32]));
        let mut stream = client
            .dial(bound, ProtocolId::new("/test/echo/1.0.0"))
            .await
            .expect("dial");

        stream.send(b"hello").await.expect("send");
        let reply = stream.recv().await.expect("recv").expect("some");
        assert_eq!(&reply[..], b"hello");
        assert_eq!(stream.remote_peer_id, server.local_peer_id());
    }

    #[tokio::test]
    async fn unknown_protocol_is_rejected() {
        let server = Arc::new(Host::new(SigningKey::from_bytes(&[12u8; 32])));
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let listener = TcpListener::bind(addr).await.unwrap();
        let bound = listener.local_addr().unwrap();
        drop(listener);

        let server_clone = server.clone();
        tokio::spawn(async move {
            let _ = server_clone.listen(bound).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let client = Host::new(SigningKey::from_bytes(&[13u8; 32]));
        // The server closes the socket as soon as it sees an unregistered
        // protocol id, before running the handshake, so the dialer's side
        // of the handshake fails rather than hanging.
        let res = tokio::time::timeout(
            Duration::from_secs(2),
            client.dial(bound, ProtocolId::new("/not/registered/1.0.0")),
        )
        .await
        .expect("dial should not hang against a dropped connection");
        assert!(res.is_err());
    }
}
