//! `storage_variant = FileSystem` (spec §6.3): one JSON file per
//! `StoreKey` under a root directory, written atomically (temp file +
//! rename) so a crash mid-write never leaves a torn record — the same
//! durability concern `forwarder`'s journal applies at the SQLite level,
//! translated here to a single-file store.

use std::fs;
use std::path::PathBuf;

use aether_proto::ClientConfig;
use tracing::debug;

use crate::{check_valid, decode, encode, ClientStore, StoreError, StoreKey};

pub struct FileSystemStore {
    root: PathBuf,
}

impl FileSystemStore {
    /// Opens (creating if needed) a file-backed store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(FileSystemStore { root })
    }

    fn path_for(&self, key: StoreKey) -> PathBuf {
        let file_name = format!("{}-{}.json", key.class_id, key.client_id);
        self.root.join(file_name)
    }
}

impl ClientStore for FileSystemStore {
    fn save(&self, key: StoreKey, config: &ClientConfig) -> Result<(), StoreError> {
        check_valid(config)?;
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");
        let bytes = encode(config)?;
        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, &path)?;
        debug!(path = %path.display(), "persisted ClientConfig");
        Ok(())
    }

    fn load(&self, key: StoreKey) -> Result<ClientConfig, StoreError> {
        let path = self.path_for(key);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound
            } else {
                StoreError::Io(e)
            }
        })?;
        decode(&bytes)
    }

    fn remove(&self, key: StoreKey) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn contains(&self, key: StoreKey) -> bool {
        self.path_for(key).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::sample_config;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemStore::open(dir.path()).unwrap();
        let config = sample_config();
        let key = StoreKey::client_config(config.uid);
        store.save(key, &config).unwrap();
        assert_eq!(store.load(key).unwrap(), config);
    }

    #[test]
    fn reopening_the_same_root_sees_prior_saves() {
        let dir = tempfile::tempdir().unwrap();
        let config = sample_config();
        let key = StoreKey::client_config(config.uid);
        {
            let store = FileSystemStore::open(dir.path()).unwrap();
            store.save(key, &config).unwrap();
        }
        let store = FileSystemStore::open(dir.path()).unwrap();
        assert_eq!(store.load(key).unwrap(), config);
    }

    #[test]
    fn missing_record_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemStore::open(dir.path()).unwrap();
        let key = StoreKey::client_config(aether_proto::Uid::new([5; 16]));
        assert!(matches!(store.load(key), Err(StoreError::NotFound)));
    }

    #[test]
    fn remove_deletes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemStore::open(dir.path()).unwrap();
        let config = sample_config();
        let key = StoreKey::client_config(config.uid);
        store.save(key, &config).unwrap();
        assert!(store.contains(key));
        store.remove(key).unwrap();
        assert!(!store.contains(key));
    }
}
