//! A fresh identity registers against a registrar, the resulting
//! `ClientConfig` persists, and `Aether::connect` brings it up as a live
//! `Client` that can actually exchange a message over its assigned cloud.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aether_client::{Aether, AetherConfig, Client};
use aether_proto::config::{Endpoint, Protocol, SafeStreamConfig, StorageVariant};
use aether_proto::registration::SignatureMethod;
use aether_proto::{ClientConfig, ServerConfig, ServerId, Uid};
use aether_store::RamStore;
use aether_test_utils::{MockAssignment, MockCloud, MockRegistrar};
use aether_transport::registry::AdapterRegistry;
use aether_transport::tcp::TcpTransportBuilder;

#[path = "common/mod.rs"]
mod common;
use common::session_key_for;

fn adapter_registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(TcpTransportBuilder));
    registry
}

fn config_pointing_at(registration_endpoint: Endpoint, trust_anchor: [u8; 32]) -> AetherConfig {
    AetherConfig {
        storage: StorageVariant::Ram,
        storage_path: None,
        k: 1,
        request_timeout_ms: 2_000,
        max_repeat_count: 3,
        safe_stream: SafeStreamConfig::default(),
        signature_pubkeys: HashMap::from([(SignatureMethod::Ed25519, trust_anchor)]),
        registration_endpoints: vec![registration_endpoint],
    }
}

#[tokio::test]
async fn registering_then_connecting_yields_a_working_client() {
    // The mock cloud's address isn't known until it's bound, so the
    // registrar is told to hand out its descriptor only after the fact.
    let server_id = ServerId(1);
    let bob_uid = Uid::new([0x99; 16]);
    let bob_key = vec![0xEEu8; 32];

    let live_cloud =
        MockCloud::start_with_server_id(vec![(bob_uid, session_key_for(&bob_key, server_id))], server_id)
            .await
            .unwrap();
    let live_addr = live_cloud.local_addr();

    let mut assignment = MockAssignment::default();
    assignment.cloud = vec![server_id];
    assignment.descriptors = vec![aether_proto::registration::ServerDescriptor {
        server_id,
        ips: vec![aether_proto::registration::IpPorts {
            ip: live_addr.ip().to_string(),
            ports: vec![aether_proto::registration::PortProto { protocol: Protocol::Tcp, port: live_addr.port() }],
        }],
    }];
    let registrar = MockRegistrar::start_with_assignment(assignment).await.unwrap();

    let aether = Aether::new(
        config_pointing_at(
            Endpoint { host: "127.0.0.1".into(), port: registrar.local_addr().port(), protocol: Protocol::Tcp },
            registrar.trust_anchor(),
        ),
        adapter_registry(),
        Arc::new(RamStore::new()),
    );

    let parent_uid = Uid::new([0x01; 16]);
    let uid = aether.register(parent_uid).await.unwrap();
    assert!(aether.has_identity(uid));
    assert_eq!(uid, MockAssignment::default().uid);

    let alice = aether.connect(uid).unwrap();

    let mut bob_adapters = AdapterRegistry::new();
    bob_adapters.register(Arc::new(TcpTransportBuilder));
    let bob = Client::connect(
        ClientConfig {
            parent_uid: Uid::new([0xAA; 16]),
            uid: bob_uid,
            ephemeral_uid: bob_uid,
            master_key: bob_key,
            cloud: vec![ServerConfig {
                server_id,
                endpoints: vec![Endpoint { host: live_addr.ip().to_string(), port: live_addr.port(), protocol: Protocol::Tcp }],
            }],
        },
        Arc::new(bob_adapters),
        SafeStreamConfig::default(),
        1,
        Duration::from_secs(2),
        3,
    )
    .unwrap();

    alice.write(bob_uid, bytes::Bytes::from_static(b"registered and delivered")).await.unwrap();
    let inbound = tokio::time::timeout(Duration::from_secs(5), bob.recv()).await.unwrap().unwrap();
    assert_eq!(&inbound.bytes[..], b"registered and delivered");

    alice.stop();
    bob.stop();
}
