#![forbid(unsafe_code)]

//! Node identity and session cryptography.
//!
//! - [`identity`]: Ed25519 keypair derived from a 32-byte seed, and the
//!   multihash-style [`identity::PeerId`] derived from the public key.
//! - [`aead`]: ChaCha20-Poly1305 session wrapper used to encrypt stream
//!   payloads once two peers have punched through to each other.
//! - [`namehash`]: CRC64 of a human-memorable name, a legacy short numeric
//!   id kept distinct from [`identity::PeerId`] and used only to resolve a
//!   peer by name rather than as the stable cryptographic identity.

pub mod aead;
pub mod identity;
pub mod namehash;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("cryptographic operation failed: {0}")]
    Crypto(String),
}

pub type Result<T> = core::result::Result<T, Error>;
