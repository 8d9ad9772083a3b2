//! `CloudConnections` (C5, spec §4.5): selects up to `K` top-priority
//! servers of a `Cloud`, maintains their `ServerSession`s, and quarantines
//! servers whose session goes `Dead`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aether_proto::{RequestPolicy, ServerId};
use aether_transport::registry::AdapterRegistry;
use tokio::sync::broadcast;
use tracing::info;

use crate::server::Cloud;
use crate::server_session::{spawn, ServerSessionHandle, ServerSessionState};

const QUARANTINE_BASE: Duration = Duration::from_secs(1);
const QUARANTINE_CAP: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub enum CloudConnectionsEvent {
    /// Fired after `selected` has already been replaced (spec §5:
    /// "listeners observe the new set").
    ServersUpdate,
}

struct Quarantine {
    deadline: Instant,
    backoff: Duration,
}

/// Per-client-cloud connection manager (spec §4.5).
pub struct CloudConnections {
    cloud: Cloud,
    adapters: Arc<AdapterRegistry>,
    session_key: Box<dyn Fn(ServerId) -> [u8; 32] + Send + Sync>,
    k: usize,
    selected: Vec<ServerSessionHandle>,
    quarantined: HashMap<ServerId, Quarantine>,
    events: broadcast::Sender<CloudConnectionsEvent>,
}

impl CloudConnections {
    pub fn new(
        cloud: Cloud,
        adapters: Arc<AdapterRegistry>,
        session_key: impl Fn(ServerId) -> [u8; 32] + Send + Sync + 'static,
        k: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        let mut this = CloudConnections {
            cloud,
            adapters,
            session_key: Box::new(session_key),
            k,
            selected: Vec::new(),
            quarantined: HashMap::new(),
            events,
        };
        this.select(Instant::now());
        this
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CloudConnectionsEvent> {
        self.events.subscribe()
    }

    pub fn selected(&self) -> &[ServerSessionHandle] {
        &self.selected
    }

    /// Re-runs selection: skip quarantined servers (unless their deadline
    /// has passed), take the first `K` eligible, build or reuse a
    /// `ServerSession` for each (spec §4.5 steps 1-2).
    pub fn select(&mut self, now: Instant) {
        let mut next: Vec<ServerSessionHandle> = Vec::with_capacity(self.k);
        for server in self.cloud.servers() {
            if next.len() >= self.k {
                break;
            }
            if let Some(q) = self.quarantined.get(&server.server_id) {
                if q.deadline > now {
                    continue;
                }
                self.quarantined.remove(&server.server_id);
            }
            if let Some(existing) = self.selected.iter().find(|h| h.server_id == server.server_id) {
                next.push(existing.clone());
                continue;
            }
            let key = (self.session_key)(server.server_id);
            next.push(spawn(server.clone(), key, Arc::clone(&self.adapters)));
        }

        let changed = next.len() != self.selected.len()
            || next.iter().zip(self.selected.iter()).any(|(a, b)| a.server_id != b.server_id);
        self.selected = next;
        if changed {
            let _ = self.events.send(CloudConnectionsEvent::ServersUpdate);
        }
    }

    /// Reviews `selected` for dead sessions, quarantines them with
    /// exponential backoff (spec §4.5: "start 1s, x2 per failure, cap
    /// 5min"), and re-runs selection.
    pub fn reap_dead(&mut self, now: Instant) {
        let mut any_dead = false;
        self.selected.retain(|handle| {
            if handle.state() == ServerSessionState::Dead {
                any_dead = true;
                let backoff = self
                    .quarantined
                    .get(&handle.server_id)
                    .map(|q| (q.backoff * 2).min(QUARANTINE_CAP))
                    .unwrap_or(QUARANTINE_BASE);
                info!(server_id = %handle.server_id, backoff = ?backoff, "quarantining dead server session");
                self.quarantined.insert(handle.server_id, Quarantine { deadline: now + backoff, backoff });
                false
            } else {
                true
            }
        });
        if any_dead {
            self.select(now);
        }
    }

    /// Iterates `selected` per `policy` (spec §4.5 `visit_servers`).
    pub fn visit_servers(&self, policy: RequestPolicy) -> Vec<ServerSessionHandle> {
        match policy {
            RequestPolicy::MainServer => self.selected.first().cloned().into_iter().collect(),
            RequestPolicy::Priority(i) => self.selected.get(i).cloned().into_iter().collect(),
            RequestPolicy::Replica(n) => self.selected.iter().take(n).cloned().collect(),
            RequestPolicy::All => self.selected.to_vec(),
        }
    }

    /// Forces every selected session to tear down and reconnect (spec
    /// §4.5 `restream()`).
    pub fn restream(&mut self) {
        for handle in &self.selected {
            handle.restream();
        }
    }

    pub fn cloud(&self) -> &Cloud {
        &self.cloud
    }
}
