//! A mock registration cloud speaking the real root-API wire protocol
//! (spec §4.10), for exercising `aether_registration::register` end to
//! end without a real registrar deployment.
//!
//! Binds a TCP listener on a random port and accepts connections the same
//! way a reference `MockWsServer` would, except the protocol spoken over
//! each connection is the four-phase registration handshake: an
//! unencrypted signed `ReturnKey`, an encrypted `PowParams` reply carrying
//! a second signed key, `Register`, then `ResolveServers`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use ed25519_dalek::{Signer, SigningKey};
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use aether_crypto::aead::Role;
use aether_crypto::pow;
use aether_proto::registration::{FinishReply, IpPorts, PortProto, PowMethod, PowParamsReply, ServerDescriptor, SignedKey};
use aether_proto::{Protocol, ServerId, Uid};
use aether_registration::{RootCall, RootReply};
use aether_session::crypto_session::CryptoSession;

const RETURN_KEY_LEN: usize = 32;
/// Small pool/threshold so tests don't burn real wall-clock time on PoW.
const POW_POOL_SIZE: u16 = 2;
const POW_MAX_HASH: u64 = u64::MAX / 4;

/// A registered mock identity: the uid/cloud a successful `Register` call
/// is assigned. One registrar can be configured to hand out a fixed
/// response so tests can assert on it.
#[derive(Debug, Clone)]
pub struct MockAssignment {
    pub uid: Uid,
    pub ephemeral_uid: Uid,
    pub cloud: Vec<ServerId>,
    pub descriptors: Vec<ServerDescriptor>,
}

impl Default for MockAssignment {
    fn default() -> Self {
        let server_id = ServerId(1);
        MockAssignment {
            uid: Uid::new([0x11; 16]),
            ephemeral_uid: Uid::new([0x22; 16]),
            cloud: vec![server_id],
            descriptors: vec![ServerDescriptor {
                server_id,
                ips: vec![IpPorts {
                    ip: "127.0.0.1".into(),
                    ports: vec![PortProto { protocol: Protocol::Tcp, port: 9443 }],
                }],
            }],
        }
    }
}

pub struct MockRegistrar {
    addr: SocketAddr,
    trust_anchor: [u8; 32],
    _task: tokio::task::JoinHandle<()>,
}

impl MockRegistrar {
    /// Starts the mock registrar with the default assignment (spec §8
    /// scenario F's happy path).
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with_assignment(MockAssignment::default()).await
    }

    pub async fn start_with_assignment(assignment: MockAssignment) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let trust_anchor = signing_key.verifying_key().to_bytes();
        let signing_key = Arc::new(signing_key);
        let assignment = Arc::new(assignment);
        let next_ephemeral_counter = Arc::new(AtomicU16::new(1));

        let task = tokio::spawn({
            let signing_key = Arc::clone(&signing_key);
            let assignment = Arc::clone(&assignment);
            async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, _peer)) => {
                            let signing_key = Arc::clone(&signing_key);
                            let assignment = Arc::clone(&assignment);
                            let counter = Arc::clone(&next_ephemeral_counter);
                            tokio::spawn(async move {
                                let _ = handle_connection(stream, signing_key, assignment, counter).await;
                            });
                        }
                        Err(_) => break,
                    }
                }
            }
        });

        Ok(MockRegistrar { addr, trust_anchor, _task: task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// The ed25519 verifying key this registrar signs `SignedKey`s with;
    /// feed this into `RegistrationParams::signature_pubkeys` under
    /// `SignatureMethod::Ed25519`.
    pub fn trust_anchor(&self) -> [u8; 32] {
        self.trust_anchor
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    signing_key: Arc<SigningKey>,
    assignment: Arc<MockAssignment>,
    ephemeral_counter: Arc<AtomicU16>,
) -> std::io::Result<()> {
    let mut plain_buf = Vec::new();

    // Phase 1: GetReturnKey (unencrypted).
    let _call: RootCall = recv_plain(&mut stream, &mut plain_buf).await?;
    let mut return_key_bytes = vec![0u8; RETURN_KEY_LEN];
    rand::thread_rng().fill_bytes(&mut return_key_bytes);
    let signature = signing_key.sign(&return_key_bytes).to_bytes().to_vec();
    send_plain(&mut stream, &RootReply::ReturnKey(SignedKey { signature, key: return_key_bytes.clone() })).await?;
    let mut return_session = CryptoSession::new(&return_key_bytes, Role::Server).expect("32-byte key");

    // Phase 2: RequestPowParams (over the return-key session).
    let _call: RootCall = recv_encrypted(&mut stream, &mut return_session).await?;
    let mut global_key_bytes = vec![0u8; RETURN_KEY_LEN];
    rand::thread_rng().fill_bytes(&mut global_key_bytes);
    let global_signature = signing_key.sign(&global_key_bytes).to_bytes().to_vec();
    let salt = b"mock-registrar-salt".to_vec();
    let pw_suffix = b"mock-pw-suffix".to_vec();
    let pow_reply = PowParamsReply {
        global_key: SignedKey { signature: global_signature, key: global_key_bytes.clone() },
        salt: salt.clone(),
        max_hash: POW_MAX_HASH,
        pw_suffix: pw_suffix.clone(),
        pool_size: POW_POOL_SIZE,
    };
    send_encrypted(&mut stream, &mut return_session, &RootReply::PowParams(pow_reply)).await?;
    let mut global_session = CryptoSession::new(&global_key_bytes, Role::Server).expect("32-byte key");

    // Phase 3: Register (over the global-key session).
    let call: RootCall = recv_encrypted(&mut stream, &mut global_session).await?;
    let RootCall::Register { pow_pool, .. } = call else {
        return send_encrypted(
            &mut stream,
            &mut global_session,
            &RootReply::Error { message: "expected Register".into() },
        )
        .await;
    };
    if pow::verify(PowMethod::Crc32, &pow_pool, &salt, &pw_suffix, POW_MAX_HASH).is_err() {
        return send_encrypted(
            &mut stream,
            &mut global_session,
            &RootReply::Error { message: "proof-of-work did not satisfy the threshold".into() },
        )
        .await;
    }
    let n = ephemeral_counter.fetch_add(1, Ordering::Relaxed);
    let finish = FinishReply {
        uid: assignment.uid,
        ephemeral_uid: bump_uid(assignment.ephemeral_uid, n),
        cloud: assignment.cloud.clone(),
    };
    send_encrypted(&mut stream, &mut global_session, &RootReply::Finish(finish)).await?;

    // Phase 4: ResolveServers (over the global-key session).
    let _call: RootCall = recv_encrypted(&mut stream, &mut global_session).await?;
    send_encrypted(&mut stream, &mut global_session, &RootReply::Servers(assignment.descriptors.clone())).await?;

    Ok(())
}

/// Salts the default ephemeral uid so concurrently-registering tests get
/// distinguishable ephemeral ids out of one assignment.
fn bump_uid(uid: Uid, n: u16) -> Uid {
    let mut bytes = *uid.as_bytes();
    let [hi, lo] = n.to_be_bytes();
    bytes[14] ^= hi;
    bytes[15] ^= lo;
    Uid::new(bytes)
}

/// Mirrors `aether_registration`'s private length-prefixed JSON root
/// channel framing (4-byte BE length prefix, JSON body) from the server
/// side; that module isn't exported, so the wire shape is reproduced here.
async fn send_plain(stream: &mut TcpStream, reply: &RootReply) -> std::io::Result<()> {
    let body = serde_json::to_vec(reply).expect("RootReply always serializes");
    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
    framed.extend_from_slice(&body);
    stream.write_all(&framed).await
}

async fn recv_plain(stream: &mut TcpStream, buf: &mut Vec<u8>) -> std::io::Result<RootCall> {
    loop {
        if buf.len() >= 4 {
            let len = u32::from_be_bytes(buf[..4].try_into().unwrap()) as usize;
            if buf.len() >= 4 + len {
                let body: Vec<u8> = buf[4..4 + len].to_vec();
                buf.drain(..4 + len);
                return serde_json::from_slice(&body).map_err(std::io::Error::other);
            }
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "registrar connection closed"));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn send_encrypted(stream: &mut TcpStream, session: &mut CryptoSession, reply: &RootReply) -> std::io::Result<()> {
    let body = serde_json::to_vec(reply).expect("RootReply always serializes");
    let frame = session.encode_frame(&body);
    stream.write_all(&frame).await
}

async fn recv_encrypted(stream: &mut TcpStream, session: &mut CryptoSession) -> std::io::Result<RootCall> {
    loop {
        if let Some(result) = session.poll_frame() {
            let plaintext = result.map_err(std::io::Error::other)?;
            return serde_json::from_slice(&plaintext).map_err(std::io::Error::other);
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "registrar connection closed"));
        }
        session.feed(&chunk[..n]);
    }
}
