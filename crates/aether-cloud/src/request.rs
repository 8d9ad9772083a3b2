//! `CloudRequest` (C6, spec §4.6): fans one authorized API call across the
//! servers selected by a `RequestPolicy`, succeeding on the first success
//! and failing only once every target has failed.

use std::time::{Duration, Instant};

use aether_proto::{AuthorizedCall, ClientSafeEvent, RequestPolicy};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::connections::CloudConnections;
use crate::server_session::{ServerSessionError, ServerSessionEvent, ServerSessionHandle};

#[derive(Debug, Error)]
pub enum CloudRequestError {
    #[error("no servers selected for this cloud")]
    NoServers,
    #[error("all targets failed across {0} attempt(s)")]
    AllFailed(usize),
    #[error("request was stopped")]
    Stopped,
    #[error("cloud replied with an unexpected event for this call")]
    UnexpectedReply,
}

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_REPEAT_COUNT: u8 = 3;

/// How many times one in-flight call resubmits after a `ChannelChanged`
/// before it just waits out the rest of its deadline — a session flapping
/// between channels shouldn't let a single request retry forever.
const MAX_CHANNEL_CHANGED_RESUBMITS: u32 = 3;

/// Calls `target`, but if its session fires `ChannelChanged` before the
/// reply arrives, cancels the in-flight call and resubmits it against the
/// (now-switched) session instead of letting it sit out its full timeout
/// (spec §6, `get_client_cloud_connection.cpp`'s resubmit-on-reconnect
/// behavior).
async fn call_with_resubmit(
    target: &ServerSessionHandle,
    call: &AuthorizedCall,
    timeout: Duration,
) -> Result<ClientSafeEvent, ServerSessionError> {
    let mut events = target.subscribe();
    let deadline = Instant::now() + timeout;

    for resubmit in 0..MAX_CHANNEL_CHANGED_RESUBMITS {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ServerSessionError::Timeout);
        }

        let call_fut = tokio::time::timeout(remaining, target.call(call.clone()));
        tokio::pin!(call_fut);

        loop {
            tokio::select! {
                result = &mut call_fut => {
                    match result.unwrap_or(Err(ServerSessionError::Timeout)) {
                        // The session flushes every pending call with Closed
                        // on any transport break, including a same-channel
                        // reconnect that never fires ChannelChanged at all —
                        // give it the same resubmit budget rather than
                        // failing a request the reconnect is about to fix.
                        Err(ServerSessionError::Closed) => break,
                        other => return other,
                    }
                }
                event = events.recv() => {
                    match event {
                        Ok(ServerSessionEvent::ChannelChanged) => {
                            debug!(server_id = %target.server_id, resubmit, "channel changed mid-request, resubmitting");
                            break;
                        }
                        // Unrelated traffic on the same session; keep
                        // waiting on the call already in flight.
                        Ok(ServerSessionEvent::MessagePush { .. }) => continue,
                        // We can't tell whether a ChannelChanged was among
                        // the dropped events, so resubmit conservatively.
                        Err(RecvError::Lagged(_)) => {
                            debug!(server_id = %target.server_id, resubmit, "missed broadcast events, resubmitting defensively");
                            break;
                        }
                        // The session task is gone; there's no one left to fire
                        // ChannelChanged, so stop racing and let the call speak
                        // for itself instead of masking its error as a timeout.
                        Err(RecvError::Closed) => return call_fut.await.unwrap_or(Err(ServerSessionError::Timeout)),
                    }
                }
            }
        }
    }

    // Resubmit budget spent, or the event channel closed: ride out whatever
    // remains of the deadline on one final, uninterrupted call rather than
    // failing early while time is still left on the clock.
    let remaining = deadline.saturating_duration_since(Instant::now());
    tokio::time::timeout(remaining, target.call(call.clone())).await.unwrap_or(Err(ServerSessionError::Timeout))
}

/// Runs `call` against `connections`'s current selection per `policy`
/// (spec §4.6). Replica semantics: succeeds on any target's success; only
/// fails once all targets in the round have failed. The whole action is
/// retried up to `max_repeat_count` times on a clean sweep of failures
/// before giving up (spec §4.6 "wrapped in a RepeatableTask").
pub async fn send_request(
    connections: &CloudConnections,
    call: AuthorizedCall,
    policy: RequestPolicy,
    timeout: Duration,
    max_repeat_count: u8,
) -> Result<ClientSafeEvent, CloudRequestError> {
    for attempt in 0..=max_repeat_count {
        let targets = connections.visit_servers(policy);
        if targets.is_empty() {
            return Err(CloudRequestError::NoServers);
        }

        let futures = targets.iter().map(|target| {
            let call = call.clone();
            let target = target.clone();
            Box::pin(async move { call_with_resubmit(&target, &call, timeout).await })
        });

        match futures_util::future::select_ok(futures).await {
            Ok((event, _remaining)) => return Ok(event),
            Err(last_err) => {
                warn!(attempt, target_count = targets.len(), error = %last_err, "all replica targets failed this round");
            }
        }
    }
    Err(CloudRequestError::AllFailed((max_repeat_count as usize) + 1))
}

/// Authorized access check for sending to `dst_uid` (spec §6.1's
/// `check_access_for_send_message`, recovered from
/// `ae_actions/check_access_for_send_message.*`): `Ok(true)` if the cloud
/// replies `Ack`, `Ok(false)` on an explicit `Error` reply, and
/// `Err(UnexpectedReply)` for anything else.
pub async fn check_access(
    connections: &CloudConnections,
    dst_uid: aether_proto::Uid,
    policy: RequestPolicy,
    timeout: Duration,
    max_repeat_count: u8,
) -> Result<bool, CloudRequestError> {
    let event = send_request(
        connections,
        AuthorizedCall::CheckAccessForSendMessage { dst_uid },
        policy,
        timeout,
        max_repeat_count,
    )
    .await?;
    match event {
        ClientSafeEvent::Ack => Ok(true),
        ClientSafeEvent::Error { .. } => Ok(false),
        _ => Err(CloudRequestError::UnexpectedReply),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Cloud;
    use aether_proto::{Endpoint, Protocol, ServerConfig, ServerId};
    use aether_transport::registry::AdapterRegistry;
    use std::sync::Arc;

    #[tokio::test]
    async fn no_servers_selected_is_an_immediate_error() {
        let cloud = Cloud::from_configs(&[ServerConfig {
            server_id: ServerId(9),
            endpoints: vec![Endpoint { host: "127.0.0.1".into(), port: 1, protocol: Protocol::Tcp }],
        }])
        .unwrap();
        let adapters = Arc::new(AdapterRegistry::new());
        // k = 0 so nothing is ever selected.
        let conns = CloudConnections::new(cloud, adapters, |_| [0u8; 32], 0);
        let err = send_request(
            &conns,
            AuthorizedCall::GetClientCloud { uid: aether_proto::Uid::new([1; 16]) },
            RequestPolicy::All,
            Duration::from_millis(50),
            0,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CloudRequestError::NoServers));
    }
}
