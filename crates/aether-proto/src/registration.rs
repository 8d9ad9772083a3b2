//! Registration root-API wire types (spec §4.10, §6.1).
//!
//! The registration root API is unencrypted at the TCP level and
//! authenticated by signatures; `aether-registration` drives these calls
//! over a plain `StreamMux` stream to the registration cloud.

use serde::{Deserialize, Serialize};

use crate::uid::{ServerId, Uid};

/// `{ip, [{protocol, port}]}` entry of a `resolve_servers` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPorts {
    pub ip: String,
    pub ports: Vec<PortProto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortProto {
    pub protocol: crate::config::Protocol,
    pub port: u16,
}

/// Reply payload of `resolve_servers` (spec §3 `ServerDescriptor`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub server_id: ServerId,
    pub ips: Vec<IpPorts>,
}

/// `{sign, key}` — a registrar public key, signed by the baked-in trust
/// anchor so the client can verify it came from the real registration cloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedKey {
    pub signature: Vec<u8>,
    pub key: Vec<u8>,
}

/// Reply to `request_proof_of_work_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowParamsReply {
    pub global_key: SignedKey,
    pub salt: Vec<u8>,
    pub max_hash: u64,
    pub pw_suffix: Vec<u8>,
    pub pool_size: u16,
}

/// Method identifier for `request_proof_of_work_data`'s hash family; the
/// wire only ever carries `Crc32` today but the field is kept open-ended
/// the way the source's `pow_method: u8` is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PowMethod {
    Crc32 = 0,
}

/// Identifies which trusted public key a `SignedKey` is checked against —
/// mirrors the original's `signs_pk_` map keyed by signature method rather
/// than a single hardcoded scheme, even though `Ed25519` is the only
/// method either side implements today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SignatureMethod {
    Ed25519 = 0,
}

/// Reply to `registration(..).finish()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishReply {
    pub uid: Uid,
    pub ephemeral_uid: Uid,
    pub cloud: Vec<ServerId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;

    #[test]
    fn server_descriptor_json_round_trips() {
        let desc = ServerDescriptor {
            server_id: ServerId(7),
            ips: vec![IpPorts {
                ip: "203.0.113.5".into(),
                ports: vec![PortProto { protocol: Protocol::Tcp, port: 9000 }],
            }],
        };
        let json = serde_json::to_string(&desc).unwrap();
        let back: ServerDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, desc);
    }
}
