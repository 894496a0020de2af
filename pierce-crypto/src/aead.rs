//! Per-tunnel AEAD session: ChaCha20-Poly1305 with a sequence-derived nonce.
//!
//! Deliberately a single cipher suite — no HPKE/hybrid post-quantum
//! negotiation, since this is a pairwise tunnel, not a mix network.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{Error, Result};

/// Derive a 32-byte session key from a shared secret via HKDF-SHA256.
pub fn derive_key(shared_secret: &[u8], info: &[u8]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut out = [0u8; 32];
    hk.expand(info, &mut out)
        .expect("32 bytes is a valid HKDF output length");
    out
}

fn nonce_for_seq(base: &[u8; 12], seq: u64) -> [u8; 12] {
    let mut n = *base;
    let ctr = seq.to_be_bytes();
    for i in 0..8 {
        n[4 + i] ^= ctr[i];
    }
    n
}

/// One-directional AEAD session bound to a monotonically increasing sequence
/// number, so the same key can safely encrypt many frames on a tunnel.
pub struct AeadSession {
    cipher: ChaCha20Poly1305,
    base_nonce: [u8; 12],
    seq: u64,
    key_bytes: [u8; 32],
}

impl AeadSession {
    pub fn new(key: [u8; 32], base_nonce: [u8; 12]) -> Self {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        Self {
            cipher,
            base_nonce,
            seq: 0,
            key_bytes: key,
        }
    }

    pub fn seal(&mut self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = nonce_for_seq(&self.base_nonce, self.seq);
        self.seq += 1;
        self.cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| Error::Crypto(format!("seal failed: {e}")))
    }

    pub fn open(&mut self, aad: &[u8], ciphertext: &[u8], seq: u64) -> Result<Vec<u8>> {
        let nonce = nonce_for_seq(&self.base_nonce, seq);
        self.cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|e| Error::Crypto(format!("open failed: {e}")))
    }

    pub fn sequence(&self) -> u64 {
        self.seq
    }
}

impl Drop for AeadSession {
    fn drop(&mut self) {
        self.key_bytes.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_then_open_round_trips() {
        let key = derive_key(b"shared-secret", b"pierce/tunnel/v1");
        let mut tx = AeadSession::new(key, [0u8; 12]);
        let mut rx = AeadSession::new(key, [0u8; 12]);

        let ct = tx.seal(b"aad", b"hello").expect("seal");
        let pt = rx.open(b"aad", &ct, 0).expect("open");
        assert_eq!(pt, b"hello");
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let key = derive_key(b"shared-secret", b"pierce/tunnel/v1");
        let mut tx = AeadSession::new(key, [0u8; 12]);
        let mut rx = AeadSession::new(key, [0u8; 12]);

        let mut ct = tx.seal(b"aad", b"hello").expect("seal");
        ct[0] ^= 0xff;
        assert!(rx.open(b"aad", &ct, 0).is_err());
    }

    #[test]
    fn sequence_advances_per_seal() {
        let key = derive_key(b"shared-secret", b"info");
        let mut tx = AeadSession::new(key, [1u8; 12]);
        assert_eq!(tx.sequence(), 0);
        let _ = tx.seal(b"", b"a");
        let _ = tx.seal(b"", b"b");
        assert_eq!(tx.sequence(), 2);
    }
}
