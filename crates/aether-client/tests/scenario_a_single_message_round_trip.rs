//! A single small message sent by one client arrives intact at the other,
//! over a real TCP-backed mock cloud.

use std::sync::Arc;
use std::time::Duration;

use aether_client::Client;
use aether_proto::config::SafeStreamConfig;
use aether_proto::{Endpoint, Protocol, ServerConfig, ServerId, Uid};
use aether_test_utils::MockCloud;

#[path = "common/mod.rs"]
mod common;
use common::{adapters, session_key_for};

fn config_for(uid: Uid, master_key: Vec<u8>, server_id: ServerId, cloud_addr: std::net::SocketAddr) -> aether_proto::ClientConfig {
    aether_proto::ClientConfig {
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
async fn alice_writes_and_bob_receives_the_same_bytes() {
    let alice_uid = Uid::new([0x01; 16]);
    let bob_uid = Uid::new([0x02; 16]);
    let alice_key = vec![0x11; 32];
    let bob_key = vec![0x22; 32];
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

    let alice = Client::connect(
        config_for(alice_uid, alice_key, server_id, cloud.local_addr()),
        adapters(),
        SafeStreamConfig::default(),
        1,
        Duration::from_secs(2),
        3,
    )
    .unwrap();
    let bob = Client::connect(
        config_for(bob_uid, bob_key, server_id, cloud.local_addr()),
        adapters(),
        SafeStreamConfig::default(),
        1,
        Duration::from_secs(2),
        3,
    )
    .unwrap();

    alice.write(bob_uid, bytes::Bytes::from_static(b"hello from alice")).await.unwrap();

    let inbound = tokio::time::timeout(Duration::from_secs(5), bob.recv()).await.unwrap().unwrap();
    assert_eq!(inbound.src_uid, alice_uid);
    assert_eq!(&inbound.bytes[..], b"hello from alice");

    let completion = tokio::time::timeout(Duration::from_secs(5), alice.next_completion()).await.unwrap().unwrap();
    assert_eq!(completion.dst_uid, bob_uid);

    alice.stop();
    bob.stop();
}

#[tokio::test]
async fn check_access_reports_whether_the_destination_is_reachable() {
    let alice_uid = Uid::new([0x03; 16]);
    let bob_uid = Uid::new([0x04; 16]);
    let ghost_uid = Uid::new([0x05; 16]);
    let alice_key = vec![0x33; 32];
    let bob_key = vec![0x44; 32];
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

    let alice = Client::connect(
        config_for(alice_uid, alice_key, server_id, cloud.local_addr()),
        adapters(),
        SafeStreamConfig::default(),
        1,
        Duration::from_secs(2),
        3,
    )
    .unwrap();
    let _bob = Client::connect(
        config_for(bob_uid, bob_key, server_id, cloud.local_addr()),
        adapters(),
        SafeStreamConfig::default(),
        1,
        Duration::from_secs(2),
        3,
    )
    .unwrap();

    // Give bob's connection a moment to register in the mock cloud's mailbox table.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(alice.check_access_for_send(bob_uid).await.unwrap());
    assert!(!alice.check_access_for_send(ghost_uid).await.unwrap());
}
