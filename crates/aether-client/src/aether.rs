//! `Aether` (C12, spec §4.12): the root handle a host application owns —
//! ties together the transport adapter registry, persisted client storage,
//! the registration handshake, and bringing a stored identity up into a
//! live [`Client`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use aether_proto::Uid;
use aether_registration::{register, RegistrationError, RegistrationParams};
use aether_store::{ClientStore, StoreError, StoreKey};
use aether_transport::registry::AdapterRegistry;

use crate::client::{Client, ClientError};
use crate::config::AetherConfig;

#[derive(Debug, Error)]
pub enum AetherError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// The library's root object (spec §4.12): one per host identity tree, not
/// per connection — `register` mints new identities, `connect` brings a
/// persisted one up live.
pub struct Aether {
    config: AetherConfig,
    adapters: Arc<AdapterRegistry>,
    store: Arc<dyn ClientStore>,
}

impl Aether {
    pub fn new(config: AetherConfig, adapters: AdapterRegistry, store: Arc<dyn ClientStore>) -> Self {
        Aether { config, adapters: Arc::new(adapters), store }
    }

    /// Runs the registration handshake against `parent_uid`'s registrar and
    /// persists the resulting `ClientConfig` under its assigned uid (spec
    /// §4.10 + §6.2: "the handshake's result is the only record a host is
    /// expected to persist").
    pub async fn register(&self, parent_uid: Uid) -> Result<Uid, AetherError> {
        let params = RegistrationParams {
            endpoints: self.config.registration_endpoints.clone(),
            parent_uid,
            signature_pubkeys: self.config.signature_pubkeys.clone(),
            reply_timeout: Duration::from_millis(self.config.request_timeout_ms),
        };
        let client_config = register(params, &self.adapters).await?;
        let uid = client_config.uid;
        self.store.save(StoreKey::client_config(uid), &client_config)?;
        Ok(uid)
    }

    /// Loads `uid`'s persisted `ClientConfig` and spawns its live `Client`.
    pub fn connect(&self, uid: Uid) -> Result<Client, AetherError> {
        let client_config = self.store.load(StoreKey::client_config(uid))?;
        let client = Client::connect(
            client_config,
            Arc::clone(&self.adapters),
            self.config.safe_stream,
            self.config.k,
            Duration::from_millis(self.config.request_timeout_ms),
            self.config.max_repeat_count,
        )?;
        Ok(client)
    }

    /// True if `uid` has a persisted identity ready to `connect`.
    pub fn has_identity(&self, uid: Uid) -> bool {
        self.store.contains(StoreKey::client_config(uid))
    }

    /// Forgets `uid`'s persisted identity (spec §4.12: host-initiated
    /// de-registration leaves no local trace to reconnect with).
    pub fn forget(&self, uid: Uid) -> Result<(), AetherError> {
        self.store.remove(StoreKey::client_config(uid))?;
        Ok(())
    }
}
