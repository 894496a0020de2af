//! The single `redb` table backing every persisted key (`token`,
//! `bootstraps`, `gateway_name`, `listen_port`, `portmap_resources`,
//! `portmap_apps`, `socks_outbound`, `proxy_service_config`): one
//! string-keyed, string-valued table, JSON-encoded values, a write
//! transaction per mutation.

use redb::{Database, ReadableTable, TableDefinition};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};

const TABLE: TableDefinition<'static, &'static str, &'static str> = TableDefinition::new("pierce_kv");

pub const KEY_TOKEN: &str = "token";
pub const KEY_BOOTSTRAPS: &str = "bootstraps";
pub const KEY_GATEWAY_NAME: &str = "gateway_name";
pub const KEY_LISTEN_PORT: &str = "listen_port";
pub const KEY_PORTMAP_RESOURCES: &str = "portmap_resources";
pub const KEY_PORTMAP_APPS: &str = "portmap_apps";
pub const KEY_SOCKS_OUTBOUND: &str = "socks_outbound";
pub const KEY_PROXY_SERVICE_CONFIG: &str = "proxy_service_config";

#[derive(Clone)]
pub struct KvStore {
    db: Arc<Database>,
}

impl KvStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path.as_ref())
            .map_err(|e| Error::config(format!("opening {}: {e}", path.as_ref().display())))?;
        {
            // Touch the table once so reads against a brand-new database
            // never hit a "table does not exist" error.
            let wtx = db
                .begin_write()
                .map_err(|e| Error::config(format!("redb begin_write: {e}")))?;
            wtx.open_table(TABLE)
                .map_err(|e| Error::config(format!("redb open_table: {e}")))?;
            wtx.commit()
                .map_err(|e| Error::config(format!("redb commit: {e}")))?;
        }
        Ok(Self { db: Arc::new(db) })
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let rtx = self
            .db
            .begin_read()
            .map_err(|e| Error::config(format!("redb begin_read: {e}")))?;
        let table = rtx
            .open_table(TABLE)
            .map_err(|e| Error::config(format!("redb open_table: {e}")))?;
        Ok(table
            .get(key)
            .map_err(|e| Error::config(format!("redb get: {e}")))?
            .map(|v| v.value().to_string()))
    }

    pub fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        let wtx = self
            .db
            .begin_write()
            .map_err(|e| Error::config(format!("redb begin_write: {e}")))?;
        {
            let mut table = wtx
                .open_table(TABLE)
                .map_err(|e| Error::config(format!("redb open_table: {e}")))?;
            table
                .insert(key, value)
                .map_err(|e| Error::config(format!("redb insert: {e}")))?;
        }
        wtx.commit()
            .map_err(|e| Error::config(format!("redb commit: {e}")))?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let wtx = self
            .db
            .begin_write()
            .map_err(|e| Error::config(format!("redb begin_write: {e}")))?;
        {
            let mut table = wtx
                .open_table(TABLE)
                .map_err(|e| Error::config(format!("redb open_table: {e}")))?;
            table
                .remove(key)
                .map_err(|e| Error::config(format!("redb remove: {e}")))?;
        }
        wtx.commit()
            .map_err(|e| Error::config(format!("redb commit: {e}")))?;
        Ok(())
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key)? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.set_raw(key, &text)
    }

    pub fn get_token(&self) -> Result<Option<u64>> {
        match self.get_raw(KEY_TOKEN)? {
            Some(text) => Ok(Some(
                text.parse()
                    .map_err(|_| Error::config("stored token is not a valid u64"))?,
            )),
            None => Ok(None),
        }
    }

    pub fn set_token(&self, token: u64) -> Result<()> {
        self.set_raw(KEY_TOKEN, &token.to_string())
    }

    pub fn get_listen_port(&self) -> Result<Option<u16>> {
        match self.get_raw(KEY_LISTEN_PORT)? {
            Some(text) => Ok(Some(
                text.parse()
                    .map_err(|_| Error::config("stored listen_port is not a valid u16"))?,
            )),
            None => Ok(None),
        }
    }

    pub fn set_listen_port(&self, port: u16) -> Result<()> {
        self.set_raw(KEY_LISTEN_PORT, &port.to_string())
    }

    pub fn get_gateway_name(&self) -> Result<Option<String>> {
        self.get_raw(KEY_GATEWAY_NAME)
    }

    pub fn set_gateway_name(&self, name: &str) -> Result<()> {
        self.set_raw(KEY_GATEWAY_NAME, name)
    }

    pub fn get_bootstraps(&self) -> Result<Vec<String>> {
        Ok(self.get_json(KEY_BOOTSTRAPS)?.unwrap_or_default())
    }

    pub fn set_bootstraps(&self, bootstraps: &[String]) -> Result<()> {
        self.set_json(KEY_BOOTSTRAPS, &bootstraps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = KvStore::open(dir.path().join("test.redb")).expect("open");
        assert_eq!(store.get_token().unwrap(), None);
        store.set_token(0xdead_beef_cafe_babe).unwrap();
        assert_eq!(store.get_token().unwrap(), Some(0xdead_beef_cafe_babe));
    }

    #[test]
    fn bootstraps_round_trip_as_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = KvStore::open(dir.path().join("test.redb")).expect("open");
        let list = vec!["/ip4/1.2.3.4/tcp/9000".to_string()];
        store.set_bootstraps(&list).unwrap();
        assert_eq!(store.get_bootstraps().unwrap(), list);
    }

    #[test]
    fn generic_json_helpers_round_trip_a_map() {
        use std::collections::HashMap;
        let dir = tempfile::tempdir().expect("tempdir");
        let store = KvStore::open(dir.path().join("test.redb")).expect("open");
        let mut map = HashMap::new();
        map.insert(42u64, "resource-a".to_string());
        store.set_json(KEY_PORTMAP_RESOURCES, &map).unwrap();
        let back: HashMap<u64, String> = store.get_json(KEY_PORTMAP_RESOURCES).unwrap().unwrap();
        assert_eq!(back.get(&42), Some(&"resource-a".to_string()));
    }

    #[test]
    fn remove_clears_a_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = KvStore::open(dir.path().join("test.redb")).expect("open");
        store.set_gateway_name("gw-1").unwrap();
        store.remove(KEY_GATEWAY_NAME).unwrap();
        assert_eq!(store.get_gateway_name().unwrap(), None);
    }
}
