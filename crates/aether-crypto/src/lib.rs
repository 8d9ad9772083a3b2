//! Cryptographic primitives for the Aethernet client: AEAD session framing,
//! per-server key derivation, registrar signature verification, and the
//! registration proof-of-work (spec §3, §4.2, §4.10).

pub mod aead;
pub mod kdf;
pub mod pow;
pub mod sign;

pub use aead::{CryptoError, CryptoSession, Role, MAX_CONSECUTIVE_BAD_FRAMES};
pub use kdf::{derive_session_key, KdfError, SESSION_KEY_LEN};
pub use pow::PowError;
pub use sign::SignError;
