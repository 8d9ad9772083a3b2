//! `AetherConfig` loading (spec §6.3): TOML is the sole config source, the
//! same raw-then-resolved-with-defaults shape a forwarder-style config
//! loader uses, adapted to this library's construction-time surface.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use aether_cloud::{DEFAULT_MAX_REPEAT_COUNT, DEFAULT_REQUEST_TIMEOUT};
use aether_proto::config::{Endpoint, Protocol, SafeStreamConfig, StorageVariant};
use aether_proto::registration::SignatureMethod;

#[derive(Debug, Clone)]
pub struct AetherConfig {
    pub storage: StorageVariant,
    /// Required when `storage == FileSystem`.
    pub storage_path: Option<String>,
    /// Size of `CloudConnections`'s top-K selection (spec §4.5).
    pub k: usize,
    pub request_timeout_ms: u64,
    pub max_repeat_count: u8,
    pub safe_stream: SafeStreamConfig,
    /// Trusted registrar public keys the handshake verifies registrar-issued
    /// keys against, one per signature method (spec §4.10, §6.3) — mirrors
    /// the original's `signs_pk_[method]` map rather than a single hardcoded
    /// scheme, even though only `Ed25519` is wired up today.
    pub signature_pubkeys: HashMap<SignatureMethod, [u8; 32]>,
    /// Registration channels to try in order (spec §4.10, §6.3): the first
    /// one that accepts a connection is used, and only once every entry has
    /// been tried does registration fail.
    pub registration_endpoints: Vec<Endpoint>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    storage: Option<String>,
    storage_path: Option<String>,
    k: Option<usize>,
    request_timeout_ms: Option<u64>,
    max_repeat_count: Option<u8>,
    safe_stream: Option<RawSafeStreamConfig>,
    /// `method = "hex pubkey"` entries, e.g. `ed25519 = "00112233..."`.
    signature_pubkeys: Option<HashMap<String, String>>,
    registration_endpoints: Option<Vec<RawRegistrationConfig>>,
}

#[derive(Debug, Deserialize)]
struct RawSafeStreamConfig {
    buffer_capacity: Option<u16>,
    window_size: Option<u16>,
    max_payload: Option<u16>,
    max_repeat_count: Option<u8>,
    wait_confirm_timeout_ms: Option<u64>,
    send_confirm_delay_ms: Option<u64>,
    send_repeat_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawRegistrationConfig {
    host: Option<String>,
    port: Option<u16>,
    protocol: Option<String>,
}

pub fn load_from_path(path: &Path) -> Result<AetherConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidValue {
        field: "path".into(),
        reason: e.to_string(),
    })?;
    load_from_str(&toml_str)
}

pub fn load_from_str(toml_str: &str) -> Result<AetherConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str)?;

    let storage = match raw.storage.as_deref() {
        None | Some("ram") => StorageVariant::Ram,
        Some("file_system") => StorageVariant::FileSystem,
        Some("spiffs") => StorageVariant::Spiffs,
        Some("static_header") => StorageVariant::StaticHeader,
        Some(other) => {
            return Err(ConfigError::InvalidValue { field: "storage".into(), reason: format!("unknown variant {other}") })
        }
    };
    if storage == StorageVariant::FileSystem && raw.storage_path.is_none() {
        return Err(ConfigError::MissingField("storage_path".into()));
    }

    let raw_pubkeys =
        raw.signature_pubkeys.ok_or_else(|| ConfigError::MissingField("signature_pubkeys".into()))?;
    let mut signature_pubkeys = HashMap::with_capacity(raw_pubkeys.len());
    for (method_name, hex) in raw_pubkeys {
        let method = match method_name.as_str() {
            "ed25519" => SignatureMethod::Ed25519,
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "signature_pubkeys".into(),
                    reason: format!("unknown signature method {other}"),
                })
            }
        };
        signature_pubkeys.insert(method, decode_hex_32("signature_pubkeys", &hex)?);
    }
    if !signature_pubkeys.contains_key(&SignatureMethod::Ed25519) {
        return Err(ConfigError::MissingField("signature_pubkeys.ed25519".into()));
    }

    let raw_endpoints = raw
        .registration_endpoints
        .ok_or_else(|| ConfigError::MissingField("registration_endpoints".into()))?;
    if raw_endpoints.is_empty() {
        return Err(ConfigError::MissingField("registration_endpoints".into()));
    }
    let mut registration_endpoints = Vec::with_capacity(raw_endpoints.len());
    for (i, raw_registration) in raw_endpoints.into_iter().enumerate() {
        let host = raw_registration
            .host
            .ok_or_else(|| ConfigError::MissingField(format!("registration_endpoints[{i}].host")))?;
        let port = raw_registration
            .port
            .ok_or_else(|| ConfigError::MissingField(format!("registration_endpoints[{i}].port")))?;
        let protocol = match raw_registration.protocol.as_deref() {
            None | Some("tcp") => Protocol::Tcp,
            Some("udp") => Protocol::Udp,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    field: format!("registration_endpoints[{i}].protocol"),
                    reason: format!("unknown protocol {other}"),
                })
            }
        };
        registration_endpoints.push(Endpoint { host, port, protocol });
    }

    let default_safe_stream = SafeStreamConfig::default();
    let safe_stream = match raw.safe_stream {
        Some(s) => SafeStreamConfig {
            buffer_capacity: s.buffer_capacity.unwrap_or(default_safe_stream.buffer_capacity),
            window_size: s.window_size.unwrap_or(default_safe_stream.window_size),
            max_payload: s.max_payload.unwrap_or(default_safe_stream.max_payload),
            max_repeat_count: s.max_repeat_count.unwrap_or(default_safe_stream.max_repeat_count),
            wait_confirm_timeout_ms: s.wait_confirm_timeout_ms.unwrap_or(default_safe_stream.wait_confirm_timeout_ms),
            send_confirm_delay_ms: s.send_confirm_delay_ms.unwrap_or(default_safe_stream.send_confirm_delay_ms),
            send_repeat_timeout_ms: s.send_repeat_timeout_ms.unwrap_or(default_safe_stream.send_repeat_timeout_ms),
        },
        None => default_safe_stream,
    };
    safe_stream
        .validate()
        .map_err(|reason| ConfigError::InvalidValue { field: "safe_stream".into(), reason: reason.into() })?;

    Ok(AetherConfig {
        storage,
        storage_path: raw.storage_path,
        k: raw.k.unwrap_or(3),
        request_timeout_ms: raw.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT.as_millis() as u64),
        max_repeat_count: raw.max_repeat_count.unwrap_or(DEFAULT_MAX_REPEAT_COUNT),
        safe_stream,
        signature_pubkeys,
        registration_endpoints,
    })
}

fn decode_hex_32(field: &str, s: &str) -> Result<[u8; 32], ConfigError> {
    let s = s.trim();
    if !s.is_ascii() {
        return Err(ConfigError::InvalidValue { field: field.into(), reason: "expected ASCII hex digits".into() });
    }
    if s.len() != 64 {
        return Err(ConfigError::InvalidValue {
            field: field.into(),
            reason: format!("expected 64 hex chars, got {}", s.len()),
        });
    }
    let mut out = [0u8; 32];
    for (i, chunk) in out.iter_mut().enumerate() {
        let byte_str = &s[i * 2..i * 2 + 2];
        *chunk = u8::from_str_radix(byte_str, 16)
            .map_err(|e| ConfigError::InvalidValue { field: field.into(), reason: e.to_string() })?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [signature_pubkeys]
        ed25519 = "00112233445566778899aabbccddeeff00112233445566778899aabbccddee"

        [[registration_endpoints]]
        host = "registrar.example.com"
        port = 9443
    "#;

    #[test]
    fn minimal_config_fills_in_defaults() {
        let config = load_from_str(SAMPLE).unwrap();
        assert_eq!(config.k, 3);
        assert_eq!(config.storage, StorageVariant::Ram);
        assert_eq!(config.safe_stream, SafeStreamConfig::default());
        assert_eq!(config.registration_endpoints.len(), 1);
        assert_eq!(config.registration_endpoints[0].port, 9443);
    }

    #[test]
    fn multiple_registration_endpoints_are_kept_in_order() {
        let toml = format!(
            "{SAMPLE}\n[[registration_endpoints]]\nhost = \"fallback.example.com\"\nport = 9444\n"
        );
        let config = load_from_str(&toml).unwrap();
        assert_eq!(config.registration_endpoints.len(), 2);
        assert_eq!(config.registration_endpoints[1].host, "fallback.example.com");
    }

    #[test]
    fn missing_signature_pubkeys_is_rejected() {
        let err = load_from_str("[[registration_endpoints]]\nhost = \"h\"\nport = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "signature_pubkeys"));
    }

    #[test]
    fn missing_registration_endpoints_is_rejected() {
        let toml = r#"
            [signature_pubkeys]
            ed25519 = "00112233445566778899aabbccddeeff00112233445566778899aabbccddee"
        "#;
        let err = load_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "registration_endpoints"));
    }

    #[test]
    fn non_ascii_signature_pubkey_is_rejected_not_panicking() {
        let toml = r#"
            [signature_pubkeys]
            ed25519 = "é0112233445566778899aabbccddeeff00112233445566778899aabbccdde"

            [[registration_endpoints]]
            host = "registrar.example.com"
            port = 9443
        "#;
        let err = load_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "signature_pubkeys"));
    }

    #[test]
    fn file_system_storage_requires_storage_path() {
        let toml = format!("storage = \"file_system\"\n{SAMPLE}");
        let err = load_from_str(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "storage_path"));
    }
}
