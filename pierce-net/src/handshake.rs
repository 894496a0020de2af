//! Authenticated key exchange run on every freshly dialed/accepted
//! connection before any named-protocol traffic is allowed.
//!
//! Each side generates a fresh X25519 key, signs it with its long-term
//! Ed25519 identity key, and sends `eph_pub(32) || ed25519_pub(32) ||
//! signature(64)` (128 bytes total). Both sides then run X25519 Diffie-
//! Hellman and derive two directional ChaCha20-Poly1305 keys via HKDF, so a
//! passive eavesdropper who later compromises the long-term key cannot
//! decrypt a recorded session (forward secrecy), while the signature binds
//! the ephemeral key to a known [`PeerId`] (no anonymous MITM).

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use pierce_crypto::aead::{derive_key, AeadSession};
use pierce_crypto::identity::PeerId;
use rand::rngs::OsRng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret as X25519Secret};

use crate::errors::{Error, Result};

const MESSAGE_LEN: usize = 32 + 32 + 64;

pub struct HandshakeOutput {
    pub remote_peer_id: PeerId,
    pub remote_public_key: VerifyingKey,
    pub tx: AeadSession,
    pub rx: AeadSession,
}

fn build_message(signing_key: &SigningKey, eph_public: &X25519Public) -> [u8; MESSAGE_LEN] {
    let mut msg = [0u8; MESSAGE_LEN];
    msg[..32].copy_from_slice(eph_public.as_bytes());
    msg[32..64].copy_from_slice(signing_key.verifying_key().as_bytes());
    let sig = signing_key.sign(&msg[..32]);
    msg[64..].copy_from_slice(&sig.to_bytes());
    msg
}

fn parse_message(msg: &[u8; MESSAGE_LEN]) -> Result<(X25519Public, VerifyingKey)> {
    let eph_bytes: [u8; 32] = msg[..32].try_into().expect("fixed size");
    let ed_bytes: [u8; 32] = msg[32..64].try_into().expect("fixed size");
    let sig_bytes: [u8; 64] = msg[64..].try_into().expect("fixed size");

    let verifying_key = VerifyingKey::from_bytes(&ed_bytes)
        .map_err(|e| Error::Handshake(format!("bad ed25519 key: {e}")))?;
    let signature = Signature::from_bytes(&sig_bytes);
    verifying_key
        .verify(&eph_bytes, &signature)
        .map_err(|_| Error::Handshake("signature verification failed".into()))?;

    Ok((X25519Public::from(eph_bytes), verifying_key))
}

fn sessions_from_shared_secret(
    shared: &[u8],
    local_is_dialer: bool,
) -> (AeadSession, AeadSession) {
    let (tx_info, rx_info): (&[u8], &[u8]) = if local_is_dialer {
        (b"pierce/net/dialer-to-listener", b"pierce/net/listener-to-dialer")
    } else {
        (b"pierce/net/listener-to-dialer", b"pierce/net/dialer-to-listener")
    };
    let tx_key = derive_key(shared, tx_info);
    let rx_key = derive_key(shared, rx_info);
    (
        AeadSession::new(tx_key, [0u8; 12]),
        AeadSession::new(rx_key, [0u8; 12]),
    )
}

async fn exchange<S>(stream: &mut S, signing_key: &SigningKey) -> Result<(X25519Secret, X25519Public, VerifyingKey)>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    let eph_secret = X25519Secret::random_from_rng(OsRng);
    let eph_public = X25519Public::from(&eph_secret);
    let outgoing = build_message(signing_key, &eph_public);

    stream
        .write_all(&outgoing)
        .await
        .map_err(Error::Io)?;

    let mut incoming = [0u8; MESSAGE_LEN];
    stream.read_exact(&mut incoming).await.map_err(Error::Io)?;
    let (remote_eph, remote_verifying) = parse_message(&incoming)?;

    Ok((eph_secret, remote_eph, remote_verifying))
}

/// Run the dialer side of the handshake over an already-connected stream.
pub async fn run_dialer<S>(stream: &mut S, signing_key: &SigningKey) -> Result<HandshakeOutput>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    let (eph_secret, remote_eph, remote_verifying) = exchange(stream, signing_key).await?;
    let shared = eph_secret.diffie_hellman(&remote_eph);
    let (tx, rx) = sessions_from_shared_secret(shared.as_bytes(), true);
    Ok(HandshakeOutput {
        remote_peer_id: PeerId::from_public_key(&remote_verifying),
        remote_public_key: remote_verifying,
        tx,
        rx,
    })
}

/// Run the listener side of the handshake over an accepted stream.
pub async fn run_listener<S>(stream: &mut S, signing_key: &SigningKey) -> Result<HandshakeOutput>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    let (eph_secret, remote_eph, remote_verifying) = exchange(stream, signing_key).await?;
    let shared = eph_secret.diffie_hellman(&remote_eph);
    let (tx, rx) = sessions_from_shared_secret(shared.as_bytes(), false);
    Ok(HandshakeOutput {
        remote_peer_id: PeerId::from_public_key(&remote_verifying),
        remote_public_key: remote_verifying,
        tx,
        rx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn dialer_and_listener_derive_matching_cross_keys() {
        let dialer_key = SigningKey::from_bytes(&[1u8; 32]);
        let listener_key = SigningKey::from_bytes(&[2u8; 32]);

        let (mut a, mut b) = duplex(4096);

        let dialer_key_clone = dialer_key.clone();
        let dialer_task = tokio::spawn(async move { run_dialer(&mut a, &dialer_key_clone).await });
        let listener_task = tokio::spawn(async move { run_listener(&mut b, &listener_key).await });

        let dialer_out = dialer_task.await.unwrap().expect("dialer handshake");
        let listener_out = listener_task.await.unwrap().expect("listener handshake");

        assert_eq!(
            dialer_out.remote_peer_id,
            PeerId::from_public_key(&listener_key.verifying_key())
        );
        assert_eq!(
            listener_out.remote_peer_id,
            PeerId::from_public_key(&dialer_key.verifying_key())
        );

        let mut dialer_tx = dialer_out.tx;
        let mut listener_rx = listener_out.rx;
        let ct = dialer_tx.seal(b"aad", b"ping").unwrap();
        let pt = listener_rx.open(b"aad", &ct, 0).unwrap();
        assert_eq!(pt, b"ping");
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let dialer_key = SigningKey::from_bytes(&[3u8; 32]);
        let eph_secret = X25519Secret::random_from_rng(OsRng);
        let eph_public = X25519Public::from(&eph_secret);
        let mut forged = build_message(&dialer_key, &eph_public);
        forged[64] ^= 0xff;
        assert!(parse_message(&forged).is_err());
    }
}
