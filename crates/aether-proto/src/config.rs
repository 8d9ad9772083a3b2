//! Persistent and construction-time configuration types (spec §3, §6.2, §6.3).
//!
//! These never appear on the wire directly; they're serde types so
//! `aether-store` can save/load them and `aether-client`'s TOML config can
//! deserialize the construction-time surface.

use serde::{Deserialize, Serialize};

use crate::uid::{ServerId, Uid};

/// Transport-layer protocol an `Endpoint` speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// Address + port + protocol. `host` may be a dotted-decimal / `[ipv6]`
/// literal or a DNS name — names must be resolved to IP endpoints before a
/// `Transport` can be built (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
}

impl Endpoint {
    pub fn is_named(&self) -> bool {
        self.host.parse::<std::net::IpAddr>().is_err()
    }
}

/// One server's persisted identity: its id plus the ordered endpoints of
/// its highest-priority channel onward (spec §3 `ServerConfig`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server_id: ServerId,
    pub endpoints: Vec<Endpoint>,
}

/// Persistent state of a registered client (spec §3 `ClientConfig`, §6.2).
///
/// Field additions/removals use versioned load in `aether-store`; this type
/// itself always reflects the current schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub parent_uid: Uid,
    pub uid: Uid,
    pub ephemeral_uid: Uid,
    pub master_key: Vec<u8>,
    pub cloud: Vec<ServerConfig>,
}

impl ClientConfig {
    /// Invariant checked before every persist (spec §8 invariant 5):
    /// a ClientConfig is never written with an empty UID or empty key.
    pub fn is_valid(&self) -> bool {
        !self.uid.is_empty() && !self.master_key.is_empty() && !self.cloud.is_empty()
    }
}

/// Where `aether-store` keeps the persisted `ClientConfig` (spec §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageVariant {
    Ram,
    FileSystem,
    Spiffs,
    StaticHeader,
}

impl Default for StorageVariant {
    fn default() -> Self {
        StorageVariant::Ram
    }
}

/// Sliding-window / fragmentation tuning for new `SafeStream`s (spec §3).
///
/// Invariant: `max_payload <= window_size <= buffer_capacity`, and
/// `window_size < 2^15` so sequence arithmetic modulo 2^16 stays unambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeStreamConfig {
    pub buffer_capacity: u16,
    pub window_size: u16,
    pub max_payload: u16,
    pub max_repeat_count: u8,
    pub wait_confirm_timeout_ms: u64,
    pub send_confirm_delay_ms: u64,
    pub send_repeat_timeout_ms: u64,
}

impl SafeStreamConfig {
    /// Validate the invariants from spec §3; called by `aether-safestream`
    /// before a `SafeStream` is constructed.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_payload == 0 {
            return Err("max_payload must be > 0");
        }
        if self.max_payload > self.window_size {
            return Err("max_payload must be <= window_size");
        }
        if self.window_size > self.buffer_capacity {
            return Err("window_size must be <= buffer_capacity");
        }
        if self.window_size >= 1 << 15 {
            return Err("window_size must be < 2^15");
        }
        Ok(())
    }
}

impl Default for SafeStreamConfig {
    fn default() -> Self {
        SafeStreamConfig {
            buffer_capacity: 4096,
            window_size: 2048,
            max_payload: 1024,
            max_repeat_count: 3,
            wait_confirm_timeout_ms: 20_000,
            send_confirm_delay_ms: 50,
            send_repeat_timeout_ms: 100,
        }
    }
}

/// Which servers in a cloud's current top-K selection receive a given
/// `CloudRequest` (spec §3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestPolicy {
    MainServer,
    Priority(usize),
    Replica(usize),
    All,
}
