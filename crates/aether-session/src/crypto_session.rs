//! `CryptoSession` (spec §4.2): a length-delimited ciphertext framer over
//! a byte stream. Pure sans-IO — callers feed inbound bytes and drain
//! encoded outbound frames; no `Transport` dependency here.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tracing::warn;

use aether_crypto::aead::{CryptoError, Role};

/// AEAD tag overhead added by `XChaCha20Poly1305`'s combined mode.
const AEAD_TAG_LEN: usize = 16;
const LEN_PREFIX: usize = 4;

/// Generous default cap on a single frame's ciphertext length, independent
/// of whatever `Transport::max_packet_size` the caller later learns about.
/// Guards the reassembly buffer against a corrupted or hostile length
/// prefix before a real transport-derived limit is known.
const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CryptoSessionError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("frame length {0} exceeds the configured maximum {1}")]
    FrameTooLarge(usize, usize),
}

pub struct CryptoSession {
    aead: aether_crypto::aead::CryptoSession,
    recv_counter: u64,
    recv_buf: BytesMut,
    max_frame_len: usize,
    poisoned: bool,
}

impl CryptoSession {
    pub fn new(session_key: &[u8], role: Role) -> Result<Self, CryptoError> {
        Ok(CryptoSession {
            aead: aether_crypto::aead::CryptoSession::new(session_key, role)?,
            recv_counter: 0,
            recv_buf: BytesMut::new(),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            poisoned: false,
        })
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// `max_element_size` exposed upstream (spec §4.2): the transport's
    /// packet budget minus framing and AEAD overhead.
    pub fn max_element_size(transport_max_packet_size: usize) -> usize {
        transport_max_packet_size.saturating_sub(AEAD_TAG_LEN + LEN_PREFIX)
    }

    /// Encrypts `plaintext` and returns the length-prefixed ciphertext
    /// frame ready to hand to a `Transport::write`.
    pub fn encode_frame(&mut self, plaintext: &[u8]) -> Bytes {
        let ciphertext = self.aead.encrypt(plaintext);
        let mut framed = BytesMut::with_capacity(LEN_PREFIX + ciphertext.len());
        framed.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
        framed.extend_from_slice(&ciphertext);
        framed.freeze()
    }

    /// Appends raw bytes read off the transport into the reassembly buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        if !self.poisoned {
            self.recv_buf.extend_from_slice(bytes);
        }
    }

    /// Pulls the next fully-reassembled, decrypted plaintext frame, if one
    /// is buffered. A decrypt failure drops that frame and reports the
    /// error; the session itself is never torn down here — the caller
    /// (`ServerSession`) decides based on [`Self::should_tear_down`].
    pub fn poll_frame(&mut self) -> Option<Result<Bytes, CryptoSessionError>> {
        if self.poisoned {
            return None;
        }
        if self.recv_buf.len() < LEN_PREFIX {
            return None;
        }
        let len = u32::from_be_bytes(self.recv_buf[..LEN_PREFIX].try_into().unwrap()) as usize;
        if len > self.max_frame_len {
            self.poisoned = true;
            return Some(Err(CryptoSessionError::FrameTooLarge(len, self.max_frame_len)));
        }
        if self.recv_buf.len() < LEN_PREFIX + len {
            return None;
        }
        self.recv_buf.advance(LEN_PREFIX);
        let ciphertext = self.recv_buf.split_to(len);

        let counter = self.recv_counter;
        self.recv_counter += 1;
        match self.aead.decrypt(counter, &ciphertext) {
            Ok(plaintext) => Some(Ok(Bytes::from(plaintext))),
            Err(e) => {
                warn!(counter, "CryptoSession dropped an unauthenticated frame");
                Some(Err(CryptoSessionError::Crypto(e)))
            }
        }
    }

    pub fn should_tear_down(&self) -> bool {
        self.poisoned || self.aead.should_tear_down()
    }
}
