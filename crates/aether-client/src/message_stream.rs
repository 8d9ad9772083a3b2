//! `MessageStreamManager` (C8, spec §4.8): one background task per `Client`
//! that owns every peer's `SafeStream`, pumping `SafeFrame`s through the
//! home cloud's `send_message` authorized call and routing inbound
//! `send_message_event` pushes back into the right peer's stream — the
//! same "one task owns the protocol state machine, callers only see a
//! handle" shape as `aether_cloud::server_session`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use aether_cloud::{check_access, send_request, CloudConnections, CloudRequestError, ServerSessionEvent};
use aether_proto::config::SafeStreamConfig;
use aether_proto::{frame, AuthorizedCall, RequestPolicy, ServerId, Uid, WireEncode};
use aether_safestream::{MessageId, SafeStream, SafeStreamError, WriteOutcome};

use crate::cloud_resolver::{CloudResolver, CloudResolverError};

const TICK_INTERVAL: Duration = Duration::from_millis(10);
const CLOUD_RESOLVER_TTL: Duration = Duration::from_secs(60);

pub enum Cmd {
    Write { dst_uid: Uid, bytes: Bytes, reply: oneshot::Sender<Result<MessageId, SafeStreamError>> },
    Resolve { uid: Uid, reply: oneshot::Sender<Result<Vec<ServerId>, CloudResolverError>> },
    CheckAccess { dst_uid: Uid, reply: oneshot::Sender<Result<bool, CloudRequestError>> },
    Stop,
}

pub struct Delivered {
    pub src_uid: Uid,
    pub bytes: Bytes,
}

pub struct Completion {
    pub dst_uid: Uid,
    pub message_id: MessageId,
    pub outcome: WriteOutcome,
}

pub struct ManagerHandle {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
}

impl ManagerHandle {
    pub async fn write(&self, dst_uid: Uid, bytes: Bytes) -> Result<MessageId, SafeStreamError> {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Cmd::Write { dst_uid, bytes, reply }).is_err() {
            return Err(SafeStreamError::Cancelled);
        }
        rx.await.unwrap_or(Err(SafeStreamError::Cancelled))
    }

    pub async fn resolve(&self, uid: Uid) -> Result<Vec<ServerId>, CloudResolverError> {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Cmd::Resolve { uid, reply }).is_err() {
            return Err(CloudResolverError::ManagerStopped);
        }
        rx.await.unwrap_or(Err(CloudResolverError::ManagerStopped))
    }

    pub async fn check_access(&self, dst_uid: Uid) -> Result<bool, CloudRequestError> {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Cmd::CheckAccess { dst_uid, reply }).is_err() {
            return Err(CloudRequestError::Stopped);
        }
        rx.await.unwrap_or(Err(CloudRequestError::Stopped))
    }

    pub fn stop(&self) {
        let _ = self.cmd_tx.send(Cmd::Stop);
    }
}

/// Spawns the manager task and returns its handle plus the two channels
/// through which it surfaces inbound messages and write completions.
pub fn spawn(
    connections: CloudConnections,
    safe_stream_config: SafeStreamConfig,
    request_timeout: Duration,
    max_repeat_count: u8,
) -> (ManagerHandle, mpsc::UnboundedReceiver<Delivered>, mpsc::UnboundedReceiver<Completion>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (delivered_tx, delivered_rx) = mpsc::unbounded_channel();
    let (completions_tx, completions_rx) = mpsc::unbounded_channel();

    tokio::spawn(run(
        connections,
        safe_stream_config,
        request_timeout,
        max_repeat_count,
        cmd_rx,
        delivered_tx,
        completions_tx,
    ));

    (ManagerHandle { cmd_tx }, delivered_rx, completions_rx)
}

async fn run(
    mut connections: CloudConnections,
    safe_stream_config: SafeStreamConfig,
    request_timeout: Duration,
    max_repeat_count: u8,
    mut cmd_rx: mpsc::UnboundedReceiver<Cmd>,
    delivered_tx: mpsc::UnboundedSender<Delivered>,
    completions_tx: mpsc::UnboundedSender<Completion>,
) {
    let mut streams: HashMap<Uid, SafeStream> = HashMap::new();
    let mut receivers: HashMap<aether_proto::ServerId, tokio::sync::broadcast::Receiver<ServerSessionEvent>> =
        HashMap::new();
    let mut resolver = CloudResolver::new(CLOUD_RESOLVER_TTL);
    let mut ticker = tokio::time::interval(TICK_INTERVAL);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Cmd::Write { dst_uid, bytes, reply }) => {
                        let now = Instant::now();
                        let stream = streams
                            .entry(dst_uid)
                            .or_insert_with(|| SafeStream::new(safe_stream_config).expect("validated at construction"));
                        let _ = reply.send(stream.write(bytes, now));
                    }
                    Some(Cmd::Resolve { uid, reply }) => {
                        let result = resolver
                            .resolve(&connections, uid, RequestPolicy::MainServer, request_timeout, max_repeat_count, Instant::now())
                            .await;
                        let _ = reply.send(result);
                    }
                    Some(Cmd::CheckAccess { dst_uid, reply }) => {
                        let result =
                            check_access(&connections, dst_uid, RequestPolicy::MainServer, request_timeout, max_repeat_count)
                                .await;
                        let _ = reply.send(result);
                    }
                    Some(Cmd::Stop) | None => {
                        for stream in streams.values_mut() {
                            stream.stop();
                        }
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                connections.reap_dead(now);
                sync_receivers(&connections, &mut receivers);
                drain_inbound(&mut receivers, &mut streams, safe_stream_config, now);
                pump_streams(
                    &connections,
                    &mut streams,
                    request_timeout,
                    max_repeat_count,
                    now,
                    &delivered_tx,
                    &completions_tx,
                ).await;
            }
        }
    }
}

fn sync_receivers(
    connections: &CloudConnections,
    receivers: &mut HashMap<aether_proto::ServerId, tokio::sync::broadcast::Receiver<ServerSessionEvent>>,
) {
    let selected: Vec<_> = connections.selected().to_vec();
    receivers.retain(|server_id, _| selected.iter().any(|h| h.server_id == *server_id));
    for handle in &selected {
        receivers.entry(handle.server_id).or_insert_with(|| handle.subscribe());
    }
}

fn drain_inbound(
    receivers: &mut HashMap<aether_proto::ServerId, tokio::sync::broadcast::Receiver<ServerSessionEvent>>,
    streams: &mut HashMap<Uid, SafeStream>,
    safe_stream_config: SafeStreamConfig,
    now: Instant,
) {
    for receiver in receivers.values_mut() {
        loop {
            match receiver.try_recv() {
                Ok(ServerSessionEvent::MessagePush { src_uid, data }) => match frame::decode_exact(data) {
                    Ok(safe_frame) => {
                        let stream = streams
                            .entry(src_uid)
                            .or_insert_with(|| SafeStream::new(safe_stream_config).expect("validated at construction"));
                        stream.on_frame(safe_frame, now);
                    }
                    Err(e) => warn!(%e, "dropped malformed SafeFrame from send_message_event"),
                },
                Ok(ServerSessionEvent::ChannelChanged) => debug!("message stream manager observed a channel switch"),
                Err(tokio::sync::broadcast::error::TryRecvError::Empty) => break,
                Err(tokio::sync::broadcast::error::TryRecvError::Closed) => break,
                Err(tokio::sync::broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(skipped = n, "message stream manager lagged behind server session events");
                }
            }
        }
    }
}

/// Advances every peer's `SafeStream`, then flushes the results: outgoing
/// frames go out as `send_message` calls (sequentially — one tick's worth
/// is small and `CloudConnections` is borrowed, not owned, so these can't
/// be spawned off this task), delivered messages and completions go
/// straight to their channels.
async fn pump_streams(
    connections: &CloudConnections,
    streams: &mut HashMap<Uid, SafeStream>,
    request_timeout: Duration,
    max_repeat_count: u8,
    now: Instant,
    delivered_tx: &mpsc::UnboundedSender<Delivered>,
    completions_tx: &mpsc::UnboundedSender<Completion>,
) {
    let mut outgoing: Vec<(Uid, Bytes)> = Vec::new();

    for (&peer_uid, stream) in streams.iter_mut() {
        stream.update(now);

        for safe_frame in stream.drain_outgoing() {
            let mut buf = bytes::BytesMut::new();
            safe_frame.encode(&mut buf);
            outgoing.push((peer_uid, buf.freeze()));
        }

        for bytes in stream.drain_delivered() {
            let _ = delivered_tx.send(Delivered { src_uid: peer_uid, bytes });
        }

        for (message_id, outcome) in stream.drain_completions() {
            let _ = completions_tx.send(Completion { dst_uid: peer_uid, message_id, outcome });
        }
    }

    for (dst_uid, data) in outgoing {
        let call = AuthorizedCall::SendMessage { dst_uid, data };
        if let Err(e) =
            send_request(connections, call, RequestPolicy::MainServer, request_timeout, max_repeat_count).await
        {
            warn!(%e, peer = %dst_uid, "failed to deliver a SafeStream frame");
        }
    }
}
