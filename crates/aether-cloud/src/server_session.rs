//! `ServerSession` (C4, spec §4.4): one `CryptoSession` + `StreamMux` over
//! one `Transport` to one server, run as a background task the same way
//! `ws_forwarder_handler` owns its socket in a `tokio::select!` loop — the
//! connect/reconnect state machine and the authorized-API request/reply
//! matching all live inside that task, and callers only ever see the
//! `ServerSessionHandle`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use aether_crypto::aead::Role;
use aether_proto::{api, AuthorizedCall, ClientSafeEvent, ServerId};
use aether_session::{CryptoSession, StreamMux};
use aether_transport::registry::AdapterRegistry;

use crate::server::Server;

/// Single logical stream carrying the authorized-API request/reply
/// conversation and its asynchronous push events (spec §4.4: "the
/// authorized-API dispatcher: a thin RPC surface").
const CONTROL_STREAM: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerSessionState {
    Connecting,
    Linked,
    Failing,
    Dead,
}

#[derive(Debug, Error)]
pub enum ServerSessionError {
    #[error("server session is not linked")]
    NotLinked,
    #[error("request timed out")]
    Timeout,
    #[error("server session is shutting down")]
    Closed,
}

/// Events a `ServerSession` surfaces besides its own request/reply traffic
/// (spec §4.4, §4.6).
#[derive(Debug, Clone)]
pub enum ServerSessionEvent {
    /// Inbound `send_message_event` push, routed up to the data plane.
    MessagePush { src_uid: aether_proto::Uid, data: Bytes },
    /// A higher-priority channel became reachable mid-connect and the
    /// session switched to it; in-flight `CloudRequest`s should resubmit
    /// (spec §4.4, grounded on `get_client_cloud_connection.cpp`).
    ChannelChanged,
}

struct PendingCall {
    reply: oneshot::Sender<Result<ClientSafeEvent, ServerSessionError>>,
    deadline: Instant,
    sent_at: Instant,
}

enum Cmd {
    Call { call: AuthorizedCall, reply: oneshot::Sender<Result<ClientSafeEvent, ServerSessionError>> },
    Restream,
}

/// Handle to a live `ServerSession` background task.
#[derive(Clone)]
pub struct ServerSessionHandle {
    pub server_id: ServerId,
    state_rx: watch::Receiver<ServerSessionState>,
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    events: broadcast::Sender<ServerSessionEvent>,
}

impl ServerSessionHandle {
    pub fn state(&self) -> ServerSessionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerSessionEvent> {
        self.events.subscribe()
    }

    /// Issues one authorized API call and awaits its reply (spec §4.4).
    pub async fn call(&self, call: AuthorizedCall) -> Result<ClientSafeEvent, ServerSessionError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(Cmd::Call { call, reply }).map_err(|_| ServerSessionError::Closed)?;
        rx.await.map_err(|_| ServerSessionError::Closed)?
    }

    /// Forces this session's transport to tear down and reconnect (spec
    /// §4.5 `restream()`).
    pub fn restream(&self) {
        let _ = self.cmd_tx.send(Cmd::Restream);
    }

    pub async fn wait_for_state_change(&mut self) {
        let _ = self.state_rx.changed().await;
    }
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRIES: u32 = 5;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Spawns the background task owning one server's live connection and
/// returns a cheap, cloneable handle to it.
pub fn spawn(server: Server, session_key: [u8; 32], adapters: Arc<AdapterRegistry>) -> ServerSessionHandle {
    let (state_tx, state_rx) = watch::channel(ServerSessionState::Connecting);
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(64);
    let server_id = server.server_id;

    let handle = ServerSessionHandle { server_id, state_rx, cmd_tx, events: events.clone() };

    tokio::spawn(run(server, session_key, adapters, state_tx, cmd_rx, events));

    handle
}

async fn run(
    mut server: Server,
    session_key: [u8; 32],
    adapters: Arc<AdapterRegistry>,
    state_tx: watch::Sender<ServerSessionState>,
    mut cmd_rx: mpsc::UnboundedReceiver<Cmd>,
    events: broadcast::Sender<ServerSessionEvent>,
) {
    let mut retries: u32 = 0;
    let mut channel_idx: usize = 0;

    'reconnect: loop {
        let _ = state_tx.send(ServerSessionState::Connecting);
        if server.channels.is_empty() {
            let _ = state_tx.send(ServerSessionState::Dead);
            return;
        }

        let mut transport = None;
        for offset in 0..server.channels.len() {
            let idx = (channel_idx + offset) % server.channels.len();
            let endpoint = server.channels[idx].endpoint.clone();
            let connect_start = Instant::now();
            match adapters.build(&endpoint).await {
                Ok(t) => {
                    server.channels[idx].stats.record_connect_time(connect_start.elapsed());
                    if offset != 0 {
                        let _ = events.send(ServerSessionEvent::ChannelChanged);
                    }
                    channel_idx = idx;
                    transport = Some(t);
                    break;
                }
                Err(e) => warn!(server_id = %server.server_id, %e, "channel connect failed, trying next"),
            }
        }

        let Some(mut transport) = transport else {
            retries += 1;
            if retries >= MAX_RETRIES {
                info!(server_id = %server.server_id, "server session exhausted retries");
                let _ = state_tx.send(ServerSessionState::Dead);
                return;
            }
            let _ = state_tx.send(ServerSessionState::Failing);
            tokio::time::sleep(RETRY_BACKOFF * retries).await;
            continue 'reconnect;
        };

        retries = 0;
        let _ = state_tx.send(ServerSessionState::Linked);

        let mut crypto = match CryptoSession::new(&session_key, Role::Client) {
            Ok(c) => c,
            Err(e) => {
                warn!(server_id = %server.server_id, %e, "failed to build crypto session");
                let _ = state_tx.send(ServerSessionState::Dead);
                return;
            }
        };
        let mut mux = StreamMux::new();
        let mut pending: std::collections::VecDeque<PendingCall> = std::collections::VecDeque::new();
        let mut bad_frame_tear_down = false;
        let mut retry_ticker = tokio::time::interval(Duration::from_millis(250));

        'session: loop {
            tokio::select! {
                frame = transport.read() => {
                    let Some(frame) = frame else {
                        warn!(server_id = %server.server_id, "transport closed");
                        break 'session;
                    };
                    crypto.feed(&frame.bytes);
                    while let Some(result) = crypto.poll_frame() {
                        match result {
                            Ok(plaintext) => {
                                match mux.decode(plaintext) {
                                    Ok(aether_session::MuxEvent::Data { stream_id, bytes }) if stream_id == CONTROL_STREAM => {
                                        handle_inbound(&bytes, &mut pending, &events, &mut server.channels[channel_idx].stats);
                                    }
                                    Ok(_) => {}
                                    Err(e) => warn!(server_id = %server.server_id, %e, "malformed mux frame"),
                                }
                            }
                            Err(e) => {
                                warn!(server_id = %server.server_id, %e, "dropped unauthenticated frame");
                            }
                        }
                    }
                    if crypto.should_tear_down() {
                        bad_frame_tear_down = true;
                        break 'session;
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Cmd::Call { call, reply }) => {
                            let payload = api::encode_call(&call);
                            let wire = StreamMux::encode(CONTROL_STREAM, payload);
                            let frame = crypto.encode_frame(&wire);
                            match transport.write(frame).await {
                                aether_transport::SendAction::Sent => {
                                    let now = Instant::now();
                                    pending.push_back(PendingCall { reply, deadline: now + REQUEST_TIMEOUT, sent_at: now });
                                }
                                _ => {
                                    let _ = reply.send(Err(ServerSessionError::NotLinked));
                                }
                            }
                        }
                        Some(Cmd::Restream) => {
                            debug!(server_id = %server.server_id, "restream requested");
                            break 'session;
                        }
                        None => return,
                    }
                }
                _ = retry_ticker.tick() => {
                    let now = Instant::now();
                    while let Some(front) = pending.front() {
                        if front.deadline <= now {
                            let expired = pending.pop_front().unwrap();
                            let _ = expired.reply.send(Err(ServerSessionError::Timeout));
                        } else {
                            break;
                        }
                    }
                }
            }
        }

        while let Some(p) = pending.pop_front() {
            let _ = p.reply.send(Err(ServerSessionError::Closed));
        }

        if bad_frame_tear_down {
            warn!(server_id = %server.server_id, "tearing down session after repeated decrypt failures");
        }
        let _ = state_tx.send(ServerSessionState::Connecting);
    }
}

fn handle_inbound(
    bytes: &Bytes,
    pending: &mut std::collections::VecDeque<PendingCall>,
    events: &broadcast::Sender<ServerSessionEvent>,
    channel_stats: &mut crate::channel::ChannelStats,
) {
    match api::decode_event(bytes.clone()) {
        Ok(ClientSafeEvent::SendMessage { src_uid, data }) => {
            let _ = events.send(ServerSessionEvent::MessagePush { src_uid, data });
        }
        Ok(event) => {
            if let Some(call) = pending.pop_front() {
                channel_stats.record_rtt(call.sent_at.elapsed());
                let _ = call.reply.send(Ok(event));
            }
        }
        Err(e) => warn!(%e, "malformed client-safe-API event"),
    }
}
