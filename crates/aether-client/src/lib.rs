//! Aethernet client library: registers and connects peer-to-peer messaging
//! identities against a registrar/cloud, then carries reliable, ordered,
//! fragmented messages to other clients over `aether-safestream`.

mod aether;
mod client;
mod cloud_resolver;
mod config;
mod message_stream;

pub use aether::{Aether, AetherError};
pub use client::{Client, ClientError, InboundMessage, WriteCompletion};
pub use cloud_resolver::CloudResolverError;
pub use config::{load_from_path, load_from_str, AetherConfig, ConfigError};

pub use aether_cloud::CloudRequestError;
pub use aether_proto::{ServerId, Uid};
pub use aether_safestream::{MessageId, SafeStreamError, WriteOutcome};
