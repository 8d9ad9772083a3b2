//! `Client` (C11, spec §4.11): one registered identity's live connection to
//! its cloud, wrapping `CloudConnections`, the `MessageStreamManager`
//! background task, and the on-demand `CloudResolver`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use aether_cloud::{Cloud, CloudConnections, CloudError, CloudRequestError};
use aether_crypto::kdf;
use aether_proto::config::{ClientConfig, SafeStreamConfig};
use aether_proto::{ServerId, Uid};
use aether_safestream::{MessageId, SafeStreamError, WriteOutcome};
use aether_transport::registry::AdapterRegistry;

use crate::cloud_resolver::CloudResolverError;
use crate::message_stream::{self, Completion, Delivered, ManagerHandle};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Cloud(#[from] CloudError),
    #[error(transparent)]
    Write(#[from] SafeStreamError),
    #[error(transparent)]
    Resolve(#[from] CloudResolverError),
    #[error(transparent)]
    CheckAccess(#[from] CloudRequestError),
}

/// One inbound, fully reassembled message from a peer.
pub struct InboundMessage {
    pub src_uid: Uid,
    pub bytes: Bytes,
}

/// The terminal status of a previously issued `write`, matched back by
/// `MessageId`.
pub struct WriteCompletion {
    pub dst_uid: Uid,
    pub message_id: MessageId,
    pub outcome: WriteOutcome,
}

/// A live, registered client identity (spec §3 `ClientConfig` brought up
/// into a running connection).
pub struct Client {
    pub uid: Uid,
    pub ephemeral_uid: Uid,
    manager: ManagerHandle,
    delivered_rx: Mutex<mpsc::UnboundedReceiver<Delivered>>,
    completions_rx: Mutex<mpsc::UnboundedReceiver<Completion>>,
}

impl Client {
    /// Brings a persisted `ClientConfig` up into a live connection: derives
    /// per-server session keys (spec §3 `ServerKeys`, HKDF off the shared
    /// `master_key`), builds the cloud's `CloudConnections`, and spawns the
    /// `MessageStreamManager` task.
    pub fn connect(
        config: ClientConfig,
        adapters: Arc<AdapterRegistry>,
        safe_stream_config: SafeStreamConfig,
        k: usize,
        request_timeout: Duration,
        max_repeat_count: u8,
    ) -> Result<Self, ClientError> {
        let cloud = Cloud::from_configs(&config.cloud)?;
        let master_key = config.master_key.clone();
        let session_key = move |server_id: ServerId| {
            kdf::derive_session_key(&master_key, server_id).expect("non-empty master key validated at registration")
        };
        let connections = CloudConnections::new(cloud, adapters, session_key, k);

        let (manager, delivered_rx, completions_rx) =
            message_stream::spawn(connections, safe_stream_config, request_timeout, max_repeat_count);

        Ok(Client {
            uid: config.uid,
            ephemeral_uid: config.ephemeral_uid,
            manager,
            delivered_rx: Mutex::new(delivered_rx),
            completions_rx: Mutex::new(completions_rx),
        })
    }

    /// Fragments and queues `bytes` for delivery to `dst_uid` (spec §4.7/§4.8,
    /// §7: admission failures like `BufferFull` return synchronously here;
    /// the terminal `Sent`/`Failed`/`Stopped` status arrives later via
    /// [`Client::next_completion`]).
    pub async fn write(&self, dst_uid: Uid, bytes: Bytes) -> Result<MessageId, ClientError> {
        Ok(self.manager.write(dst_uid, bytes).await?)
    }

    /// Awaits the next fully reassembled inbound message.
    pub async fn recv(&self) -> Option<InboundMessage> {
        self.delivered_rx.lock().await.recv().await.map(|d| InboundMessage { src_uid: d.src_uid, bytes: d.bytes })
    }

    /// Awaits the next write's terminal status.
    pub async fn next_completion(&self) -> Option<WriteCompletion> {
        self.completions_rx
            .lock()
            .await
            .recv()
            .await
            .map(|c| WriteCompletion { dst_uid: c.dst_uid, message_id: c.message_id, outcome: c.outcome })
    }

    /// Resolves which servers hold `uid`'s mailbox (spec §4.9
    /// `get_client_cloud`), not needed for ordinary sends but useful for a
    /// caller validating reachability before writing.
    pub async fn resolve_peer_cloud(&self, uid: Uid) -> Result<Vec<ServerId>, ClientError> {
        Ok(self.manager.resolve(uid).await?)
    }

    /// Checks whether `dst_uid`'s cloud currently accepts sends from this
    /// client (spec §6.1 `check_access_for_send_message`), without actually
    /// queuing a message.
    pub async fn check_access_for_send(&self, dst_uid: Uid) -> Result<bool, ClientError> {
        Ok(self.manager.check_access(dst_uid).await?)
    }

    pub fn stop(&self) {
        self.manager.stop();
    }
}
