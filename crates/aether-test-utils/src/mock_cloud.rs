//! A mock cloud server speaking the real authorized-API wire protocol
//! (spec §4.4's `CryptoSession` + `StreamMux` over one `CONTROL_STREAM`),
//! for exercising a live `Client`'s `send_message`/`get_client_cloud`
//! traffic end to end without a real cloud deployment. Mirrors
//! `MockRegistrar`'s approach of reproducing the real wire shape
//! server-side rather than faking the transport away.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use aether_crypto::aead::Role;
use aether_proto::{decode_call, encode_event, AuthorizedCall, ClientSafeEvent, ServerId, Uid};
use aether_session::crypto_session::CryptoSession;
use aether_session::stream_mux::{MuxEvent, StreamMux};

const CONTROL_STREAM: u16 = 0;

type Mailboxes = Arc<Mutex<HashMap<Uid, mpsc::UnboundedSender<Bytes>>>>;

/// A mock cloud with a fixed, known roster of clients (`uid` -> per-client
/// session key). Real clouds learn these during registration; the mock is
/// handed them directly by the test.
pub struct MockCloud {
    addr: SocketAddr,
    server_id: ServerId,
    _task: tokio::task::JoinHandle<()>,
}

impl MockCloud {
    pub async fn start(clients: Vec<(Uid, [u8; 32])>) -> std::io::Result<Self> {
        Self::start_with_server_id(clients, ServerId(1)).await
    }

    pub async fn start_with_server_id(clients: Vec<(Uid, [u8; 32])>, server_id: ServerId) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let clients = Arc::new(clients);
        let mailboxes: Mailboxes = Arc::new(Mutex::new(HashMap::new()));

        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _peer)) => {
                        let clients = Arc::clone(&clients);
                        let mailboxes = Arc::clone(&mailboxes);
                        tokio::spawn(async move {
                            let _ = handle_connection(stream, &clients, mailboxes, server_id).await;
                        });
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(MockCloud { addr, server_id, _task: task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }
}

/// Identifies which registered client just connected by trial-decrypting
/// its first frame with each candidate session key — the mock's stand-in
/// for a real cloud recognizing a client purely by which pre-shared key
/// authenticates its traffic.
fn identify(clients: &[(Uid, [u8; 32])], first_chunk: &[u8]) -> Option<(Uid, [u8; 32])> {
    for (uid, key) in clients {
        let Ok(mut probe) = CryptoSession::new(key, Role::Server) else { continue };
        probe.feed(first_chunk);
        if probe.poll_frame().is_some() {
            return Some((*uid, *key));
        }
    }
    None
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    clients: &[(Uid, [u8; 32])],
    mailboxes: Mailboxes,
    server_id: ServerId,
) -> std::io::Result<()> {
    let (mut read_half, write_half) = stream.into_split();
    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Bytes>();
    tokio::spawn(async move {
        let mut write_half = write_half;
        while let Some(frame) = write_rx.recv().await {
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let mut read_buf = vec![0u8; 4096];
    let n = read_half.read(&mut read_buf).await?;
    if n == 0 {
        return Ok(());
    }
    let first_chunk = read_buf[..n].to_vec();

    let Some((uid, key)) = identify(clients, &first_chunk) else {
        return Ok(());
    };
    let mut crypto = CryptoSession::new(&key, Role::Server).expect("32-byte key");
    crypto.feed(&first_chunk);

    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Bytes>();
    mailboxes.lock().unwrap().insert(uid, push_tx);

    let mut mux = StreamMux::new();
    loop {
        while let Some(result) = crypto.poll_frame() {
            let Ok(plaintext) = result else { continue };
            if let Ok(MuxEvent::Data { stream_id, bytes }) = mux.decode(plaintext) {
                if stream_id == CONTROL_STREAM {
                    handle_call(bytes, uid, &mut crypto, &write_tx, &mailboxes, server_id);
                }
            }
        }

        tokio::select! {
            read = read_half.read(&mut read_buf) => {
                let n = read?;
                if n == 0 {
                    break;
                }
                crypto.feed(&read_buf[..n]);
            }
            Some(plaintext_frame) = push_rx.recv() => {
                let encrypted = crypto.encode_frame(&plaintext_frame);
                let _ = write_tx.send(encrypted);
            }
        }
    }

    mailboxes.lock().unwrap().remove(&uid);
    Ok(())
}

fn handle_call(
    bytes: Bytes,
    src_uid: Uid,
    crypto: &mut CryptoSession,
    write_tx: &mpsc::UnboundedSender<Bytes>,
    mailboxes: &Mailboxes,
    server_id: ServerId,
) {
    let Ok(call) = decode_call(bytes) else { return };

    let reply = match call {
        AuthorizedCall::SendMessage { dst_uid, data } => {
            let push_tx = mailboxes.lock().unwrap().get(&dst_uid).cloned();
            match push_tx {
                Some(push_tx) => {
                    let event = ClientSafeEvent::SendMessage { src_uid, data };
                    let wire = StreamMux::encode(CONTROL_STREAM, encode_event(&event));
                    let _ = push_tx.send(wire);
                    ClientSafeEvent::Ack
                }
                None => ClientSafeEvent::Error { message: "destination not connected to this mock cloud".into() },
            }
        }
        AuthorizedCall::GetClientCloud { uid } => {
            if mailboxes.lock().unwrap().contains_key(&uid) {
                ClientSafeEvent::ClientCloud { uid, cloud: vec![server_id] }
            } else {
                ClientSafeEvent::Error { message: "unknown client".into() }
            }
        }
        AuthorizedCall::CheckAccessForSendMessage { dst_uid } => {
            if mailboxes.lock().unwrap().contains_key(&dst_uid) {
                ClientSafeEvent::Ack
            } else {
                ClientSafeEvent::Error { message: "destination not connected to this mock cloud".into() }
            }
        }
        AuthorizedCall::ResolveServers { .. } => {
            ClientSafeEvent::Error { message: "resolve_servers is not implemented by this mock cloud".into() }
        }
    };

    let wire = StreamMux::encode(CONTROL_STREAM, encode_event(&reply));
    let frame = crypto.encode_frame(&wire);
    let _ = write_tx.send(frame);
}
