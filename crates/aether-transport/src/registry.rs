//! Open, order-ranked registry of `TransportBuilder`s (spec §9: "an
//! open-for-extension set of physical links"), grounded on
//! `adapter_registry.cpp`/`.h` in the original source.

use std::sync::Arc;

use aether_proto::Endpoint;

use crate::{Transport, TransportBuilder, TransportError};

/// Consulted in registration order; the first adapter whose `supports`
/// returns true builds the transport. No deep inheritance — adapters are
/// trait objects, swapped in wholesale by the host application.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn TransportBuilder>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn TransportBuilder>) {
        self.adapters.push(adapter);
    }

    pub async fn build(&self, endpoint: &Endpoint) -> Result<Box<dyn Transport>, TransportError> {
        for adapter in &self.adapters {
            if adapter.supports(endpoint) {
                return adapter.build(endpoint).await;
            }
        }
        Err(TransportError::Connect(format!(
            "no registered adapter supports endpoint {}:{}",
            endpoint.host, endpoint.port
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::TcpTransportBuilder;

    #[tokio::test]
    async fn registry_rejects_unsupported_endpoint_with_empty_registry() {
        let registry = AdapterRegistry::new();
        let endpoint = Endpoint {
            host: "127.0.0.1".into(),
            port: 1,
            protocol: aether_proto::Protocol::Tcp,
        };
        assert!(registry.build(&endpoint).await.is_err());
    }

    #[tokio::test]
    async fn registry_picks_first_supporting_adapter() {
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(TcpTransportBuilder));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let endpoint = Endpoint {
            host: addr.ip().to_string(),
            port: addr.port(),
            protocol: aether_proto::Protocol::Tcp,
        };
        assert!(registry.build(&endpoint).await.is_ok());
    }
}
