//! Signature verification for registrar-issued keys (spec §4.10: the
//! `global_key`/`pow_params` replies are signed by a trust anchor the
//! client must verify before acting on them).

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignError {
    #[error("verifying key must be 32 bytes, got {0}")]
    BadKeyLength(usize),
    #[error("signature must be 64 bytes, got {0}")]
    BadSignatureLength(usize),
    #[error("signature verification failed")]
    Invalid,
}

/// Verifies `signature` over `message` under the ed25519 `public_key`.
///
/// Grounds `PowParamsReply::global_key: SignedKey` — the registration
/// state machine calls this before trusting a server-supplied key.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), SignError> {
    let key_bytes: [u8; 32] = public_key
        .try_into()
        .map_err(|_| SignError::BadKeyLength(public_key.len()))?;
    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| SignError::BadSignatureLength(signature.len()))?;

    let verifying_key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| SignError::BadKeyLength(32))?;
    let signature = Signature::from_bytes(&sig_bytes);
    verifying_key.verify(message, &signature).map_err(|_| SignError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand_core::OsRng;

    #[test]
    fn valid_signature_verifies() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        let message = b"pow-params-reply";
        let signature = signing_key.sign(message);

        verify(verifying_key.as_bytes(), message, &signature.to_bytes()).unwrap();
    }

    #[test]
    fn tampered_message_fails_verification() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        let signature = signing_key.sign(b"original");

        assert_eq!(
            verify(verifying_key.as_bytes(), b"tampered", &signature.to_bytes()),
            Err(SignError::Invalid)
        );
    }

    #[test]
    fn malformed_key_length_is_rejected() {
        assert_eq!(verify(&[0u8; 4], b"msg", &[0u8; 64]), Err(SignError::BadKeyLength(4)));
    }
}
