//! AEAD framing for `CryptoSession` (spec §4.2): XChaCha20-Poly1305 by
//! default, 24-byte nonces, monotonically increasing send-nonce, a 64-entry
//! sliding replay window on receive.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use thiserror::Error;
use tracing::warn;

pub const NONCE_LEN: usize = 24;
pub const REPLAY_WINDOW: u64 = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("AEAD authentication failed")]
    DecryptFailed,
    #[error("nonce replayed or too far behind the window")]
    Replayed,
    #[error("session key must be exactly 32 bytes, got {0}")]
    BadKeyLength(usize),
}

/// Which end of a session this party is — folded into the nonce's top bit
/// so both directions can share one `session_key` (spec §3 `ServerKeys`)
/// without ever producing the same nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    fn tag_bit(self) -> u64 {
        match self {
            Role::Client => 0,
            Role::Server => 1 << 63,
        }
    }

    fn other(self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

fn nonce_bytes(role: Role, counter: u64) -> XNonce {
    let tagged = counter | role.tag_bit();
    let mut bytes = [0u8; NONCE_LEN];
    bytes[NONCE_LEN - 8..].copy_from_slice(&tagged.to_be_bytes());
    XNonce::clone_from_slice(&bytes)
}

/// A monotonic send-side nonce counter for one direction of one session.
#[derive(Debug, Clone, Default)]
pub struct NonceCounter(u64);

impl NonceCounter {
    pub fn next(&mut self) -> u64 {
        let n = self.0;
        self.0 += 1;
        n
    }
}

/// Sliding replay window over the last `REPLAY_WINDOW` receive-side nonces,
/// tracking the peer's counter independent of the role tag bit.
#[derive(Debug, Clone, Default)]
pub struct ReplayWindow {
    highest: Option<u64>,
    seen: u64,
}

impl ReplayWindow {
    /// Record `counter`, rejecting duplicates and anything older than the
    /// window. Returns `Ok(())` the first time a counter is accepted.
    pub fn check_and_record(&mut self, counter: u64) -> Result<(), CryptoError> {
        match self.highest {
            None => {
                self.highest = Some(counter);
                self.seen = 1;
                Ok(())
            }
            Some(highest) if counter > highest => {
                let shift = counter - highest;
                self.seen = if shift >= REPLAY_WINDOW { 1 } else { (self.seen << shift) | 1 };
                self.highest = Some(counter);
                Ok(())
            }
            Some(highest) => {
                let age = highest - counter;
                if age >= REPLAY_WINDOW {
                    return Err(CryptoError::Replayed);
                }
                let bit = 1u64 << age;
                if self.seen & bit != 0 {
                    return Err(CryptoError::Replayed);
                }
                self.seen |= bit;
                Ok(())
            }
        }
    }
}

/// One directional AEAD session: the key and nonce bookkeeping needed to
/// encrypt outgoing frames as `role` and decrypt/validate incoming frames
/// from the peer role.
pub struct CryptoSession {
    cipher: XChaCha20Poly1305,
    role: Role,
    send_counter: NonceCounter,
    replay_window: ReplayWindow,
    bad_frames_in_a_row: u32,
}

/// Tear-down threshold from spec §7: "tear down after N (default 3) in a
/// row" of protocol errors on one session.
pub const MAX_CONSECUTIVE_BAD_FRAMES: u32 = 3;

impl CryptoSession {
    pub fn new(session_key: &[u8], role: Role) -> Result<Self, CryptoError> {
        if session_key.len() != 32 {
            return Err(CryptoError::BadKeyLength(session_key.len()));
        }
        let cipher = XChaCha20Poly1305::new(Key::from_slice(session_key));
        Ok(CryptoSession {
            cipher,
            role,
            send_counter: NonceCounter::default(),
            replay_window: ReplayWindow::default(),
            bad_frames_in_a_row: 0,
        })
    }

    /// Encrypt `plaintext`, returning the ciphertext (tag included, per
    /// `chacha20poly1305`'s combined mode).
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Vec<u8> {
        let counter = self.send_counter.next();
        let nonce = nonce_bytes(self.role, counter);
        self.cipher
            .encrypt(&nonce, plaintext)
            .expect("XChaCha20-Poly1305 encryption does not fail for in-memory buffers")
    }

    /// Decrypt a ciphertext frame sent by the peer (role = `self.role.other()`).
    ///
    /// On authentication failure the frame is dropped (spec §4.2): callers
    /// bump their own telemetry counter and must tear the session down once
    /// `bad_frames_in_a_row` reaches [`MAX_CONSECUTIVE_BAD_FRAMES`].
    pub fn decrypt(&mut self, counter: u64, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.replay_window.check_and_record(counter)?;
        let nonce = nonce_bytes(self.role.other(), counter);
        match self.cipher.decrypt(&nonce, ciphertext) {
            Ok(plaintext) => {
                self.bad_frames_in_a_row = 0;
                Ok(plaintext)
            }
            Err(_) => {
                self.bad_frames_in_a_row += 1;
                warn!(counter, streak = self.bad_frames_in_a_row, "AEAD decrypt failed");
                Err(CryptoError::DecryptFailed)
            }
        }
    }

    pub fn should_tear_down(&self) -> bool {
        self.bad_frames_in_a_row >= MAX_CONSECUTIVE_BAD_FRAMES
    }

    pub fn peer_nonce_counter_hint(&self) -> u64 {
        self.send_counter.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 32] {
        [7u8; 32]
    }

    #[test]
    fn encrypt_decrypt_round_trip_for_unused_nonce() {
        let mut client = CryptoSession::new(&key(), Role::Client).unwrap();
        let mut server = CryptoSession::new(&key(), Role::Server).unwrap();

        let ciphertext = client.encrypt(b"hello server");
        let plaintext = server.decrypt(0, &ciphertext).unwrap();
        assert_eq!(plaintext, b"hello server");
    }

    #[test]
    fn both_directions_never_collide_on_nonce() {
        let mut client = CryptoSession::new(&key(), Role::Client).unwrap();
        let mut server = CryptoSession::new(&key(), Role::Server).unwrap();

        let c2s = client.encrypt(b"from client");
        let s2c = server.encrypt(b"from server");
        // Same logical counter (0) on both sides must not be interchangeable.
        assert!(client.decrypt(0, &s2c).is_err() || server.decrypt(0, &c2s).is_err());
        assert_eq!(server.decrypt(0, &c2s).unwrap_or_default(), b"from client");
    }

    #[test]
    fn replayed_nonce_is_rejected() {
        let mut client = CryptoSession::new(&key(), Role::Client).unwrap();
        let mut server = CryptoSession::new(&key(), Role::Server).unwrap();
        let ciphertext = client.encrypt(b"once");
        server.decrypt(0, &ciphertext).unwrap();
        assert_eq!(server.decrypt(0, &ciphertext), Err(CryptoError::Replayed));
    }

    #[test]
    fn out_of_order_within_window_is_accepted() {
        let mut client = CryptoSession::new(&key(), Role::Client).unwrap();
        let mut server = CryptoSession::new(&key(), Role::Server).unwrap();
        let a = client.encrypt(b"a");
        let b = client.encrypt(b"b");
        server.decrypt(1, &b).unwrap();
        server.decrypt(0, &a).unwrap();
    }

    #[test]
    fn decrypt_failure_does_not_tear_down_before_threshold() {
        let mut server = CryptoSession::new(&key(), Role::Server).unwrap();
        for i in 0..MAX_CONSECUTIVE_BAD_FRAMES - 1 {
            assert!(server.decrypt(i as u64, b"garbage").is_err());
            assert!(!server.should_tear_down());
        }
        assert!(server.decrypt(99, b"garbage").is_err());
        assert!(server.should_tear_down());
    }
}
