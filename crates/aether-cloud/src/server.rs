//! `Server` and `Cloud` (spec §3): live counterparts of the persisted
//! `ServerConfig`, carrying per-channel statistics that never need to be
//! persisted themselves.

use aether_proto::{ServerConfig, ServerId};
use thiserror::Error;

use crate::channel::Channel;

/// `{server_id, endpoints: ordered list, channels: ordered list of Channel}`
/// (spec §3). Channels are ranked; index 0 is the highest-priority channel.
#[derive(Debug, Clone)]
pub struct Server {
    pub server_id: ServerId,
    pub channels: Vec<Channel>,
}

impl Server {
    pub fn from_config(config: &ServerConfig) -> Self {
        Server {
            server_id: config.server_id,
            channels: config.endpoints.iter().cloned().map(Channel::new).collect(),
        }
    }

    pub fn best_channel(&self) -> Option<&Channel> {
        self.channels.first()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CloudError {
    #[error("a cloud must contain at least one server")]
    Empty,
}

/// Ordered list of `Server`s; order defines selection priority (spec §3).
/// Invariant: non-empty after construction.
#[derive(Debug, Clone)]
pub struct Cloud {
    servers: Vec<Server>,
}

impl Cloud {
    pub fn new(servers: Vec<Server>) -> Result<Self, CloudError> {
        if servers.is_empty() {
            return Err(CloudError::Empty);
        }
        Ok(Cloud { servers })
    }

    pub fn from_configs(configs: &[ServerConfig]) -> Result<Self, CloudError> {
        Self::new(configs.iter().map(Server::from_config).collect())
    }

    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    pub fn server(&self, id: ServerId) -> Option<&Server> {
        self.servers.iter().find(|s| s.server_id == id)
    }

    pub fn server_ids(&self) -> Vec<ServerId> {
        self.servers.iter().map(|s| s.server_id).collect()
    }
}
