//! Transport contract (C1) and DNS resolution contract, spec §4.1 and §9.
//!
//! This crate specifies the seam the physical link adapters (Ethernet,
//! Wi-Fi, cellular, LoRa) plug into; it ships one reference adapter
//! (`tcp::TcpTransportBuilder`) so the rest of the workspace has something
//! real to drive in tests, and the registry/trait shape so further
//! adapters can be added without touching the core (spec §9 "Polymorphism
//! over adapter/transport/channel" — capability interfaces, no deep
//! inheritance).

pub mod registry;
pub mod resolver;
pub mod tcp;

use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Link state of a `Transport`, mirrored upward by `ServerSession` (spec §3 `StreamInfo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Linked,
    Unlinked,
    LinkError,
}

/// Terminal status of a `write()` call (spec §4.1, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendAction {
    Sent,
    Failed,
    Stopped,
}

/// Snapshot of a transport's capabilities (spec §4.1 `info()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportInfo {
    pub link_state: LinkState,
    pub max_packet_size: usize,
    pub reliable: bool,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("transport closed")]
    Closed,
}

/// One inbound frame and the local receive time (spec §4.1 `read` event stream).
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub bytes: Bytes,
    pub recv_time: Instant,
}

/// Full-duplex byte channel to one endpoint (spec §4.1, C1).
///
/// Connection-less implementations must deliver whole frames; connection-
/// oriented ones must preserve byte order and may coalesce writes.
#[async_trait]
pub trait Transport: Send {
    async fn write(&mut self, bytes: Bytes) -> SendAction;

    /// Read the next inbound frame, or `None` once the transport is closed.
    async fn read(&mut self) -> Option<InboundFrame>;

    fn info(&self) -> TransportInfo;
}

/// Builds a `Transport` to a concrete `Endpoint` (spec §9 adapter registry).
#[async_trait]
pub trait TransportBuilder: Send + Sync {
    async fn build(
        &self,
        endpoint: &aether_proto::Endpoint,
    ) -> Result<Box<dyn Transport>, TransportError>;

    /// Whether this builder can produce a transport for `endpoint`
    /// (e.g. protocol match); used by `registry::AdapterRegistry` to pick
    /// the first applicable adapter in priority order.
    fn supports(&self, endpoint: &aether_proto::Endpoint) -> bool;
}
