//! `storage_variant = Ram` (spec §6.3): in-memory only, lost on process
//! exit. Used for ephemeral clients and in tests.

use std::collections::HashMap;
use std::sync::Mutex;

use aether_proto::ClientConfig;

use crate::{check_valid, ClientStore, StoreError, StoreKey};

#[derive(Default)]
pub struct RamStore {
    records: Mutex<HashMap<StoreKey, ClientConfig>>,
}

impl RamStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientStore for RamStore {
    fn save(&self, key: StoreKey, config: &ClientConfig) -> Result<(), StoreError> {
        check_valid(config)?;
        self.records.lock().unwrap().insert(key, config.clone());
        Ok(())
    }

    fn load(&self, key: StoreKey) -> Result<ClientConfig, StoreError> {
        self.records.lock().unwrap().get(&key).cloned().ok_or(StoreError::NotFound)
    }

    fn remove(&self, key: StoreKey) -> Result<(), StoreError> {
        self.records.lock().unwrap().remove(&key);
        Ok(())
    }

    fn contains(&self, key: StoreKey) -> bool {
        self.records.lock().unwrap().contains_key(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::sample_config;

    #[test]
    fn save_then_load_round_trips() {
        let store = RamStore::new();
        let config = sample_config();
        let key = StoreKey::client_config(config.uid);
        store.save(key, &config).unwrap();
        assert_eq!(store.load(key).unwrap(), config);
    }

    #[test]
    fn invalid_config_is_rejected_before_write() {
        let store = RamStore::new();
        let mut config = sample_config();
        config.master_key.clear();
        let key = StoreKey::client_config(config.uid);
        assert!(matches!(store.save(key, &config), Err(StoreError::InvalidRecord)));
        assert!(!store.contains(key));
    }

    #[test]
    fn missing_key_is_not_found() {
        let store = RamStore::new();
        let key = StoreKey::client_config(aether_proto::Uid::new([5; 16]));
        assert!(matches!(store.load(key), Err(StoreError::NotFound)));
    }

    #[test]
    fn remove_then_load_is_not_found() {
        let store = RamStore::new();
        let config = sample_config();
        let key = StoreKey::client_config(config.uid);
        store.save(key, &config).unwrap();
        store.remove(key).unwrap();
        assert!(matches!(store.load(key), Err(StoreError::NotFound)));
    }
}
