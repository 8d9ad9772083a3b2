//! A payload larger than one `SafeFrame`'s `max_payload` is fragmented on
//! write and reassembles atomically on the receiving end.

use std::sync::Arc;
use std::time::Duration;

use aether_client::Client;
use aether_proto::config::SafeStreamConfig;
use aether_proto::{ClientConfig, Endpoint, Protocol, ServerConfig, ServerId, Uid};
use aether_test_utils::MockCloud;

#[path = "common/mod.rs"]
mod common;
use common::{adapters, session_key_for};

fn config_for(uid: Uid, master_key: Vec<u8>, server_id: ServerId, cloud_addr: std::net::SocketAddr) -> ClientConfig {
    ClientConfig {
        parent_uid: Uid::new([0xAA; 16]),
        uid,
        ephemeral_uid: uid,
        master_key,
        cloud: vec![ServerConfig {
            server_id,
            endpoints: vec![Endpoint { host: cloud_addr.ip().to_string(), port: cloud_addr.port(), protocol: Protocol::Tcp }],
        }],
    }
}

#[tokio::test]
async fn a_message_spanning_many_fragments_reassembles_in_order() {
    let alice_uid = Uid::new([0x10; 16]);
    let bob_uid = Uid::new([0x20; 16]);
    let alice_key = vec![0x55; 32];
    let bob_key = vec![0x66; 32];
    let server_id = ServerId(1);

    let cloud = MockCloud::start_with_server_id(
        vec![
            (alice_uid, session_key_for(&alice_key, server_id)),
            (bob_uid, session_key_for(&bob_key, server_id)),
        ],
        server_id,
    )
    .await
    .unwrap();

    let mut safe_stream_config = SafeStreamConfig::default();
    safe_stream_config.max_payload = 64;

    let alice = Client::connect(
        config_for(alice_uid, alice_key, server_id, cloud.local_addr()),
        adapters(),
        safe_stream_config,
        1,
        Duration::from_secs(2),
        3,
    )
    .unwrap();
    let bob = Client::connect(
        config_for(bob_uid, bob_key, server_id, cloud.local_addr()),
        adapters(),
        safe_stream_config,
        1,
        Duration::from_secs(2),
        3,
    )
    .unwrap();

    let payload: bytes::Bytes = (0..2000u32).map(|n| (n % 251) as u8).collect::<Vec<u8>>().into();
    alice.write(bob_uid, payload.clone()).await.unwrap();

    let inbound = tokio::time::timeout(Duration::from_secs(5), bob.recv()).await.unwrap().unwrap();
    assert_eq!(inbound.bytes, payload);

    alice.stop();
    bob.stop();
}
