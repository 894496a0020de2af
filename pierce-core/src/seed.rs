//! Identity seed persistence.
//!
//! A 32-byte printable seed is stored on first run and reused deterministically
//! to recover the node's Ed25519 peer identity. The choice of *how* the seed
//! itself is protected at rest (keyring, HSM, plain file) is left to the
//! deployment; this module only handles the on-disk round trip.

use rand::RngCore;
use std::path::Path;

use crate::error::{Error, Result};

pub const SEED_LEN: usize = 32;

/// Load the identity seed from `path`, generating and persisting a fresh one
/// if it does not yet exist.
pub fn load_or_create(path: impl AsRef<Path>) -> Result<[u8; SEED_LEN]> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(text) => decode(text.trim()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let seed = generate();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, encode(&seed))?;
            Ok(seed)
        }
        Err(e) => Err(Error::Io(e)),
    }
}

fn generate() -> [u8; SEED_LEN] {
    let mut seed = [0u8; SEED_LEN];
    rand::thread_rng().fill_bytes(&mut seed);
    seed
}

fn encode(seed: &[u8; SEED_LEN]) -> String {
    hex::encode(seed)
}

fn decode(text: &str) -> Result<[u8; SEED_LEN]> {
    let bytes = hex::decode(text).map_err(|e| Error::config(format!("invalid seed file: {e}")))?;
    <[u8; SEED_LEN]>::try_from(bytes.as_slice())
        .map_err(|_| Error::config("seed file is not 32 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_reload_is_deterministic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("identity.seed");
        let first = load_or_create(&path).expect("create");
        let second = load_or_create(&path).expect("reload");
        assert_eq!(first, second);
    }
}
