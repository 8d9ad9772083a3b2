//! Persisted client state (spec §6.2, §6.3): the storage *contract* the
//! object-persistence framework would otherwise provide (out of scope per
//! spec §1 — "specified only by the storage contract the core requires").
//!
//! The host's reflective save/load framework is replaced here by a small
//! hand-written versioned envelope (spec §9 "Reflection-based save/load":
//! "a versioned load function dispatches on tag; no runtime reflection is
//! needed"), keyed by `(class_id, client_id)` the way `§6.2` describes.

mod filesystem;
mod ram;

pub use filesystem::FileSystemStore;
pub use ram::RamStore;

use aether_proto::{ClientConfig, Uid};
use thiserror::Error;

/// The class of persisted record. `ClientConfig` is the only one this
/// client library persists today; the tag exists so the key shape matches
/// spec §6.2 and so a second persisted type wouldn't collide in one store.
pub const CLASS_ID_CLIENT_CONFIG: &str = "ClientConfig";

/// `(class_id, client_id)` composite key spec §6.2 stores records under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub class_id: &'static str,
    pub client_id: Uid,
}

impl StoreKey {
    pub fn client_config(client_id: Uid) -> Self {
        StoreKey { class_id: CLASS_ID_CLIENT_CONFIG, client_id }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("refusing to persist an invalid ClientConfig (spec §8 invariant 5)")]
    InvalidRecord,
    #[error("no record found for key")]
    NotFound,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("(de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Storage contract every `storage_variant` (spec §6.3) implements.
///
/// `Spiffs` and `StaticHeader` are embedded-target variants the source
/// supports (flash filesystem, a build-time-baked header respectively);
/// neither has a meaningful desktop/server analogue, so only `Ram` and
/// `FileSystem` are implemented here — a third variant plugs in against
/// the same trait.
pub trait ClientStore: Send + Sync {
    fn save(&self, key: StoreKey, config: &ClientConfig) -> Result<(), StoreError>;
    fn load(&self, key: StoreKey) -> Result<ClientConfig, StoreError>;
    fn remove(&self, key: StoreKey) -> Result<(), StoreError>;
    fn contains(&self, key: StoreKey) -> bool;
}

/// The on-disk/in-memory envelope: a version tag plus the payload.
///
/// Field additions use versioned load: an old file missing a new field
/// deserializes into a default via `#[serde(default)]` on that field in
/// `ClientConfig` itself (see `aether-proto::config`); field removals are
/// tolerated by `#[serde(skip_serializing_if = ..)]`-style forward
/// compatibility, dispatched here on `version`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "version")]
enum VersionedRecord {
    #[serde(rename = "1")]
    V1 { config: ClientConfig },
}

impl VersionedRecord {
    fn wrap(config: ClientConfig) -> Self {
        VersionedRecord::V1 { config }
    }

    fn into_config(self) -> ClientConfig {
        match self {
            VersionedRecord::V1 { config } => config,
        }
    }
}

fn encode(config: &ClientConfig) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec_pretty(&VersionedRecord::wrap(config.clone()))?)
}

fn decode(bytes: &[u8]) -> Result<ClientConfig, StoreError> {
    let record: VersionedRecord = serde_json::from_slice(bytes)?;
    Ok(record.into_config())
}

fn check_valid(config: &ClientConfig) -> Result<(), StoreError> {
    if config.is_valid() {
        Ok(())
    } else {
        Err(StoreError::InvalidRecord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aether_proto::{Endpoint, Protocol, ServerConfig, ServerId};

    pub(crate) fn sample_config() -> ClientConfig {
        ClientConfig {
            parent_uid: Uid::new([1; 16]),
            uid: Uid::new([2; 16]),
            ephemeral_uid: Uid::new([3; 16]),
            master_key: vec![9, 9, 9, 9],
            cloud: vec![ServerConfig {
                server_id: ServerId(1),
                endpoints: vec![Endpoint { host: "127.0.0.1".into(), port: 9000, protocol: Protocol::Tcp }],
            }],
        }
    }

    #[test]
    fn envelope_round_trips() {
        let config = sample_config();
        let bytes = encode(&config).unwrap();
        let back = decode(&bytes).unwrap();
        assert_eq!(back, config);
    }
}
