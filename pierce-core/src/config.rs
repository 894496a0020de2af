//! TOML configuration loading.
//!
//! Settings that must survive process restarts (tokens, bootstrap lists,
//! portmap resources/apps, ...) are *not* part of this file — those live in
//! the `redb` key-value store. This file only carries the bootstrap knobs
//! needed to open that store and join the overlay in the first place.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the identity seed file and the `redb` database.
    pub work_dir: PathBuf,

    /// TCP/UDP port this node listens on for peer tunnels (0 = kernel-assigned).
    pub listen_port: u16,

    /// Rendezvous endpoint used for registration/query (host:port).
    pub rendezvous_addr: String,

    /// Gateway name advertised to agents; the persisted `gateway_name` key
    /// mirrors this once a node has registered.
    pub node_name: String,

    /// When true, the gateway accepts the sentinel portmap resource id and
    /// any SOCKS5 auth token unconditionally ("trial mode").
    pub trial: bool,

    /// Tracing filter string, e.g. "info" or "pierce_tunnel=debug".
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            listen_port: 0,
            rendezvous_addr: String::new(),
            node_name: "pierce-node".to_string(),
            trial: false,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!("reading {}: {e}", path.as_ref().display()))
        })?;
        let cfg: Config = toml::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            return Err(Error::config("node_name must not be empty"));
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.work_dir.join("pierce.redb")
    }

    pub fn identity_path(&self) -> PathBuf {
        self.work_dir.join("identity.seed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn empty_name_rejected() {
        let mut cfg = Config::default();
        cfg.node_name.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_round_trips_through_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pierce.toml");
        std::fs::write(
            &path,
            r#"
            work_dir = "/tmp/pierce"
            listen_port = 4433
            rendezvous_addr = "rendezvous.example:9000"
            node_name = "gw-1"
            trial = true
            log_level = "debug"
            "#,
        )
        .expect("write config");
        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.listen_port, 4433);
        assert_eq!(cfg.node_name, "gw-1");
        assert!(cfg.trial);
    }
}
