//! In-memory resource/app maps backed by [`pierce_core::KvStore`]: one mutex
//! around the map, the whole map re-serialized to a single persisted key on
//! every mutation — acceptable because app/resource counts are small.

use std::collections::HashMap;
use std::sync::Mutex;

use pierce_core::KvStore;

use crate::errors::{Error, Result};
use crate::types::{PortmapApp, PortmapResource};

pub struct ResourceStore {
    kv: KvStore,
    resources: Mutex<HashMap<u64, PortmapResource>>,
}

impl ResourceStore {
    pub fn load(kv: KvStore) -> Result<Self> {
        let resources = kv
            .get_json::<HashMap<u64, PortmapResource>>(pierce_core::store::KEY_PORTMAP_RESOURCES)?
            .unwrap_or_default();
        Ok(Self {
            kv,
            resources: Mutex::new(resources),
        })
    }

    pub fn add(&self, resource: PortmapResource) -> Result<()> {
        resource
            .validate()
            .map_err(Error::InvalidPacket)?;
        let mut guard = self.resources.lock().expect("portmap store mutex poisoned");
        if guard.contains_key(&resource.id) {
            return Err(Error::AlreadyExists(format!(
                "resource {} already exists",
                resource.id
            )));
        }
        guard.insert(resource.id, resource);
        self.persist(&guard)
    }

    pub fn remove(&self, id: u64) -> Result<()> {
        let mut guard = self.resources.lock().expect("portmap store mutex poisoned");
        if guard.remove(&id).is_none() {
            return Err(Error::NotFound(format!("resource {id}")));
        }
        self.persist(&guard)
    }

    pub fn get(&self, id: u64) -> Option<PortmapResource> {
        let guard = self.resources.lock().expect("portmap store mutex poisoned");
        guard.get(&id).cloned()
    }

    pub fn list(&self) -> Vec<PortmapResource> {
        let guard = self.resources.lock().expect("portmap store mutex poisoned");
        guard.values().cloned().collect()
    }

    fn persist(&self, map: &HashMap<u64, PortmapResource>) -> Result<()> {
        self.kv
            .set_json(pierce_core::store::KEY_PORTMAP_RESOURCES, map)?;
        Ok(())
    }
}

pub struct AppStore {
    kv: KvStore,
    apps: Mutex<HashMap<u64, PortmapApp>>,
}

impl AppStore {
    pub fn load(kv: KvStore) -> Result<Self> {
        let apps = kv
            .get_json::<HashMap<u64, PortmapApp>>(pierce_core::store::KEY_PORTMAP_APPS)?
            .unwrap_or_default();
        Ok(Self {
            kv,
            apps: Mutex::new(apps),
        })
    }

    pub fn add(&self, app: PortmapApp) -> Result<()> {
        let mut guard = self.apps.lock().expect("portmap store mutex poisoned");
        if guard.contains_key(&app.id) {
            return Err(Error::AlreadyExists(format!("app {} already exists", app.id)));
        }
        guard.insert(app.id, app);
        self.persist(&guard)
    }

    pub fn update(&self, app: PortmapApp) -> Result<()> {
        let mut guard = self.apps.lock().expect("portmap store mutex poisoned");
        if !guard.contains_key(&app.id) {
            return Err(Error::NotFound(format!("app {}", app.id)));
        }
        guard.insert(app.id, app);
        self.persist(&guard)
    }

    pub fn remove(&self, id: u64) -> Result<()> {
        let mut guard = self.apps.lock().expect("portmap store mutex poisoned");
        if guard.remove(&id).is_none() {
            return Err(Error::NotFound(format!("app {id}")));
        }
        self.persist(&guard)
    }

    pub fn get(&self, id: u64) -> Option<PortmapApp> {
        let guard = self.apps.lock().expect("portmap store mutex poisoned");
        guard.get(&id).cloned()
    }

    pub fn list(&self) -> Vec<PortmapApp> {
        let guard = self.apps.lock().expect("portmap store mutex poisoned");
        guard.values().cloned().collect()
    }

    fn persist(&self, map: &HashMap<u64, PortmapApp>) -> Result<()> {
        self.kv.set_json(pierce_core::store::KEY_PORTMAP_APPS, map)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pierce_core::Transport;

    fn resource(id: u64) -> PortmapResource {
        PortmapResource {
            id,
            name: "r".into(),
            network: Transport::Tcp,
            target_addr: "127.0.0.1".into(),
            target_port: 22,
            local_ip: None,
            local_port: None,
        }
    }

    #[test]
    fn add_get_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path().join("test.redb")).unwrap();
        let store = ResourceStore::load(kv.clone()).unwrap();
        store.add(resource(42)).unwrap();
        assert!(store.get(42).is_some());
        store.remove(42).unwrap();
        assert!(store.get(42).is_none());
    }

    #[test]
    fn add_twice_is_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path().join("test.redb")).unwrap();
        let store = ResourceStore::load(kv).unwrap();
        store.add(resource(1)).unwrap();
        assert!(matches!(store.add(resource(1)), Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn reload_from_disk_sees_persisted_resources() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.redb");
        let kv = KvStore::open(&path).unwrap();
        ResourceStore::load(kv).unwrap().add(resource(7)).unwrap();

        let kv2 = KvStore::open(&path).unwrap();
        let reloaded = ResourceStore::load(kv2).unwrap();
        assert!(reloaded.get(7).is_some());
    }
}
