//! Checksum verification for downloaded upgrade binaries.
//!
//! The upgrade server's checksum field format (raw hex, prefixed tag, or
//! something else) isn't pinned down anywhere we can see, so this exposes a
//! `ChecksumAlgorithm` seam with a SHA-256 default and treats a mismatch as
//! best-effort: logged, not fatal, until that format is confirmed.

use sha2::{Digest, Sha256};

pub trait ChecksumAlgorithm: Send + Sync {
    /// Compute the lowercase-hex digest of `data`.
    fn digest(&self, data: &[u8]) -> String;
}

#[derive(Default)]
pub struct Sha256Checksum;

impl ChecksumAlgorithm for Sha256Checksum {
    fn digest(&self, data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_digest_is_stable() {
        let algo = Sha256Checksum;
        let a = algo.digest(b"hello");
        let b = algo.digest(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn sha256_digest_differs_for_different_input() {
        let algo = Sha256Checksum;
        assert_ne!(algo.digest(b"a"), algo.digest(b"b"));
    }
}
