//! Shared test utilities for the Aethernet client workspace: an in-memory
//! duplex `Transport` pair and a mock registration cloud that speaks the
//! real root-API wire protocol, so integration tests can drive
//! registration and message delivery without a live deployment.

pub mod mock_cloud;
pub mod mock_registrar;
pub mod mock_transport;

pub use mock_cloud::MockCloud;
pub use mock_registrar::{MockAssignment, MockRegistrar};
pub use mock_transport::MockTransport;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use std::collections::HashMap;

    use aether_registration::{register, RegistrationParams};
    use aether_proto::registration::SignatureMethod;
    use aether_proto::Uid;
    use aether_transport::registry::AdapterRegistry;
    use aether_transport::tcp::TcpTransportBuilder;

    use super::*;

    fn registration_adapters() -> AdapterRegistry {
        let mut adapters = AdapterRegistry::new();
        adapters.register(Arc::new(TcpTransportBuilder));
        adapters
    }

    #[tokio::test]
    async fn registration_against_the_mock_registrar_succeeds() {
        let registrar = MockRegistrar::start().await.unwrap();
        let adapters = registration_adapters();

        let params = RegistrationParams {
            endpoints: vec![aether_proto::Endpoint {
                host: registrar.local_addr().ip().to_string(),
                port: registrar.local_addr().port(),
                protocol: aether_proto::Protocol::Tcp,
            }],
            parent_uid: Uid::new([0xAA; 16]),
            signature_pubkeys: HashMap::from([(SignatureMethod::Ed25519, registrar.trust_anchor())]),
            reply_timeout: Duration::from_secs(5),
        };

        let client_config = register(params, &adapters).await.unwrap();
        assert_eq!(client_config.parent_uid, Uid::new([0xAA; 16]));
        assert_eq!(client_config.master_key.len(), 32);
        assert_eq!(client_config.cloud.len(), 1);
    }

    #[tokio::test]
    async fn registration_rejects_a_wrong_trust_anchor() {
        let registrar = MockRegistrar::start().await.unwrap();
        let adapters = registration_adapters();

        let params = RegistrationParams {
            endpoints: vec![aether_proto::Endpoint {
                host: registrar.local_addr().ip().to_string(),
                port: registrar.local_addr().port(),
                protocol: aether_proto::Protocol::Tcp,
            }],
            parent_uid: Uid::new([0xBB; 16]),
            signature_pubkeys: HashMap::from([(SignatureMethod::Ed25519, [0u8; 32])]),
            reply_timeout: Duration::from_secs(5),
        };

        assert!(register(params, &adapters).await.is_err());
    }
}
