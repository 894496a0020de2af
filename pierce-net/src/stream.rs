//! A single authenticated, AEAD-sealed named-protocol stream, framed with a
//! simple length-delimited codec underneath.

use bytes::{Bytes, BytesMut};
use ed25519_dalek::VerifyingKey;
use futures::{SinkExt, StreamExt};
use pierce_crypto::aead::AeadSession;
use pierce_crypto::identity::PeerId;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::errors::{Error, Result};
use crate::protocol::ProtocolId;

pub struct NetStream {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    tx: AeadSession,
    rx: AeadSession,
    rx_seq: u64,
    pub protocol: ProtocolId,
    pub remote_peer_id: PeerId,
    pub remote_public_key: VerifyingKey,
}

impl NetStream {
    pub fn new(
        socket: TcpStream,
        tx: AeadSession,
        rx: AeadSession,
        protocol: ProtocolId,
        remote_peer_id: PeerId,
        remote_public_key: VerifyingKey,
    ) -> Self {
        let framed = Framed::new(socket, LengthDelimitedCodec::new());
        Self {
            framed,
            tx,
            rx,
            rx_seq: 0,
            protocol,
            remote_peer_id,
            remote_public_key,
        }
    }

    /// Seal `msg` and send it as one length-delimited application frame.
    pub async fn send(&mut self, msg: &[u8]) -> Result<()> {
        let aad = self.protocol.as_str().as_bytes();
        let ct = self
            .tx
            .seal(aad, msg)
            .map_err(|e| Error::Handshake(e.to_string()))?;
        self.framed
            .send(Bytes::from(ct))
            .await
            .map_err(Error::Io)?;
        Ok(())
    }

    /// Receive and open the next application frame, or `Ok(None)` on a clean
    /// stream close.
    pub async fn recv(&mut self) -> Result<Option<BytesMut>> {
        let frame = match self.framed.next().await {
            Some(r) => r.map_err(Error::Io)?,
            None => return Ok(None),
        };
        let aad = self.protocol.as_str().as_bytes();
        let seq = self.rx_seq;
        self.rx_seq += 1;
        let pt = self
            .rx
            .open(aad, &frame, seq)
            .map_err(|e| Error::Handshake(e.to_string()))?;
        Ok(Some(BytesMut::from(&pt[..])))
    }
}
