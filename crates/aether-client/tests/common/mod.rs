//! Shared scaffolding for the scenario tests: building an `AdapterRegistry`
//! and deriving the same per-server session key `Client::connect` would, so
//! `MockCloud` authenticates connections the way a real cloud would.

use std::sync::Arc;

use aether_crypto::kdf;
use aether_proto::ServerId;
use aether_transport::registry::AdapterRegistry;
use aether_transport::tcp::TcpTransportBuilder;

pub fn adapters() -> Arc<AdapterRegistry> {
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(TcpTransportBuilder));
    Arc::new(registry)
}

/// The session key a `Client` built from `master_key` actually puts on the
/// wire to `server_id` — `MockCloud` must be registered with this, not the
/// raw master key.
pub fn session_key_for(master_key: &[u8], server_id: ServerId) -> [u8; 32] {
    kdf::derive_session_key(master_key, server_id).expect("non-empty master key")
}
