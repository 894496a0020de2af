//! Node identity: a 32-byte seed deterministically yields an Ed25519 keypair,
//! and the public key's digest is the peer's stable [`PeerId`].

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::{Error, Result};

/// Multihash-style identifier: a tagged SHA-256 digest of the Ed25519 public
/// key, analogous to a libp2p `PeerId`. The leading byte is a fixed codec tag
/// (`0xed`, evoking "ed25519") so the encoding is self-describing even though
/// this workspace only ever produces one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; 33]);

const PEER_ID_CODEC_TAG: u8 = 0xed;

impl PeerId {
    pub fn from_public_key(pk: &VerifyingKey) -> Self {
        let digest = Sha256::digest(pk.as_bytes());
        let mut bytes = [0u8; 33];
        bytes[0] = PEER_ID_CODEC_TAG;
        bytes[1..].copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidKey(e.to_string()))?;
        let arr: [u8; 33] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKey("peer id must be 33 bytes".into()))?;
        if arr[0] != PEER_ID_CODEC_TAG {
            return Err(Error::InvalidKey("unrecognized peer id codec tag".into()));
        }
        Ok(Self(arr))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// This node's long-term identity.
pub struct Identity {
    signing_key: SigningKey,
    peer_id: PeerId,
}

impl Identity {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let peer_id = PeerId::from_public_key(&signing_key.verifying_key());
        Self {
            signing_key,
            peer_id,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        self.signing_key.sign(msg)
    }
}

/// Verify a signature made by `pk` over `msg`; used to authenticate the
/// transport handshake.
pub fn verify(pk: &VerifyingKey, msg: &[u8], sig: &Signature) -> bool {
    pk.verify(msg, sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_deterministic_from_seed() {
        let seed = [7u8; 32];
        let a = Identity::from_seed(&seed);
        let b = Identity::from_seed(&seed);
        assert_eq!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn different_seeds_yield_different_peer_ids() {
        let a = Identity::from_seed(&[1u8; 32]);
        let b = Identity::from_seed(&[2u8; 32]);
        assert_ne!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn peer_id_hex_round_trips() {
        let id = Identity::from_seed(&[9u8; 32]).peer_id();
        let hex = id.to_hex();
        let parsed = PeerId::from_hex(&hex).expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn sign_and_verify() {
        let id = Identity::from_seed(&[3u8; 32]);
        let msg = b"hello pierce";
        let sig = id.sign(msg);
        assert!(verify(&id.public_key(), msg, &sig));
        assert!(!verify(&id.public_key(), b"tampered", &sig));
    }
}
