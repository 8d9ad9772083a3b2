//! `CloudResolver` (C9, spec §4.9): resolves a peer's cloud (which servers
//! hold its mailbox) via `get_client_cloud`, with a small TTL cache so a
//! chat burst to the same peer doesn't re-issue the lookup per message.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use thiserror::Error;

use aether_cloud::{send_request, CloudConnections, CloudRequestError};
use aether_proto::{AuthorizedCall, ClientSafeEvent, RequestPolicy, ServerId, Uid};

#[derive(Debug, Error)]
pub enum CloudResolverError {
    #[error(transparent)]
    Request(#[from] CloudRequestError),
    #[error("registrar/cloud reported an error resolving this client: {0}")]
    Remote(String),
    #[error("cloud responded with the wrong event for get_client_cloud")]
    UnexpectedReply,
    #[error("message stream manager task is no longer running")]
    ManagerStopped,
}

pub struct CloudResolver {
    cache: HashMap<Uid, (Vec<ServerId>, Instant)>,
    ttl: Duration,
}

impl CloudResolver {
    pub fn new(ttl: Duration) -> Self {
        CloudResolver { cache: HashMap::new(), ttl }
    }

    /// Resolves `uid`'s cloud, serving from cache within `ttl` of the last
    /// successful lookup (spec §4.9: "a resolved cloud is cached and
    /// invalidated on channel_changed or explicit request").
    pub async fn resolve(
        &mut self,
        connections: &CloudConnections,
        uid: Uid,
        policy: RequestPolicy,
        timeout: Duration,
        max_repeat_count: u8,
        now: Instant,
    ) -> Result<Vec<ServerId>, CloudResolverError> {
        if let Some((cloud, fetched_at)) = self.cache.get(&uid) {
            if now.duration_since(*fetched_at) < self.ttl {
                return Ok(cloud.clone());
            }
        }

        let event =
            send_request(connections, AuthorizedCall::GetClientCloud { uid }, policy, timeout, max_repeat_count)
                .await?;
        match event {
            ClientSafeEvent::ClientCloud { cloud, .. } => {
                self.cache.insert(uid, (cloud.clone(), now));
                Ok(cloud)
            }
            ClientSafeEvent::Error { message } => Err(CloudResolverError::Remote(message)),
            _ => Err(CloudResolverError::UnexpectedReply),
        }
    }

    /// Drops a cached entry, forcing the next `resolve` to re-query (spec
    /// §4.9: invalidated on `channel_changed`).
    pub fn invalidate(&mut self, uid: Uid) {
        self.cache.remove(&uid);
    }
}
