//! Per-server key derivation (spec §3 `ServerKeys`): one `session_key` per
//! `(master_key, server_id)` pair, derived with HKDF-SHA256 so that
//! compromising one server's key reveals nothing about another's.

use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;

use aether_proto::ServerId;

pub const SESSION_KEY_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KdfError {
    #[error("master key must not be empty")]
    EmptyMasterKey,
    #[error("HKDF expand failed for requested output length")]
    ExpandFailed,
}

/// Derives the 32-byte AEAD session key for `server_id` from `master_key`
/// (spec §3: `ServerKeys = {server_id, session_key, nonce_state}`; the
/// nonce state lives in [`crate::aead::CryptoSession`], not here).
pub fn derive_session_key(master_key: &[u8], server_id: ServerId) -> Result<[u8; SESSION_KEY_LEN], KdfError> {
    if master_key.is_empty() {
        return Err(KdfError::EmptyMasterKey);
    }
    let hk = Hkdf::<Sha256>::new(None, master_key);
    let info = server_id_info(server_id);
    let mut okm = [0u8; SESSION_KEY_LEN];
    hk.expand(&info, &mut okm).map_err(|_| KdfError::ExpandFailed)?;
    Ok(okm)
}

const INFO_LABEL: &[u8] = b"aether-session-key";

fn server_id_info(server_id: ServerId) -> [u8; INFO_LABEL.len() + 2] {
    let mut info = [0u8; INFO_LABEL.len() + 2];
    info[..INFO_LABEL.len()].copy_from_slice(INFO_LABEL);
    info[INFO_LABEL.len()..].copy_from_slice(&server_id.0.to_be_bytes());
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let master = b"some long lived master secret";
        let a = derive_session_key(master, ServerId(1)).unwrap();
        let b = derive_session_key(master, ServerId(1)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_servers_get_different_keys() {
        let master = b"some long lived master secret";
        let a = derive_session_key(master, ServerId(1)).unwrap();
        let b = derive_session_key(master, ServerId(2)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_master_key_is_rejected() {
        assert_eq!(derive_session_key(b"", ServerId(1)), Err(KdfError::EmptyMasterKey));
    }
}
