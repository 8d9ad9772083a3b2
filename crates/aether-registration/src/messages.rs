//! Root API call/reply envelopes (spec §4.10). Payload types are the ones
//! already defined in `aether_proto::registration`; this module only adds
//! the tagged envelope the handshake dispatches on.

use serde::{Deserialize, Serialize};

use aether_proto::registration::{FinishReply, PowParamsReply, ServerDescriptor, SignedKey};
use aether_proto::uid::Uid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "call")]
pub enum RootCall {
    /// Phase 1: request a signed, ephemeral key the registrar will use to
    /// address replies for the rest of this connection.
    GetReturnKey,
    /// Phase 2 (sent over the return-key session): request proof-of-work
    /// parameters and the longer-lived global key.
    RequestPowParams,
    /// Phase 3 (sent over the global-key session): submit the computed
    /// proof-of-work pool and register under `parent_uid`.
    Register { parent_uid: Uid, master_key: Vec<u8>, pow_pool: Vec<u64> },
    /// Phase 4 (sent over the global-key session): resolve the assigned
    /// cloud's server ids to connectable endpoints.
    ResolveServers { server_ids: Vec<aether_proto::uid::ServerId> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "reply")]
pub enum RootReply {
    ReturnKey(SignedKey),
    PowParams(PowParamsReply),
    Finish(FinishReply),
    Servers(Vec<ServerDescriptor>),
    Error { message: String },
}
