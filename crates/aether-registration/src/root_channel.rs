//! Framing for the registration root API (spec §4.10, §6.1): length-
//! prefixed JSON, unencrypted and unsigned at this layer — the payloads
//! carried over it (`SignedKey`) are what actually authenticate the
//! registrar, the same way `CryptoSession` frames ciphertext but leaves
//! authentication to the AEAD tag underneath.

use bytes::{Buf, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

const LEN_PREFIX: usize = 4;
const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum RootChannelError {
    #[error("frame length {0} exceeds the maximum {1}")]
    FrameTooLarge(usize, usize),
    #[error("malformed root API payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes `value` as length-prefixed JSON ready for `Transport::write`.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Bytes, RootChannelError> {
    let body = serde_json::to_vec(value)?;
    let mut framed = BytesMut::with_capacity(LEN_PREFIX + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
    framed.extend_from_slice(&body);
    Ok(framed.freeze())
}

/// Reassembles length-prefixed JSON frames out of a byte stream (spec
/// §4.10: the root channel is message-oriented even over a
/// connection-oriented transport).
#[derive(Default)]
pub struct RootChannelDecoder {
    buf: BytesMut,
}

impl RootChannelDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pulls and decodes the next complete frame, if buffered.
    pub fn poll_frame<T: DeserializeOwned>(&mut self) -> Option<Result<T, RootChannelError>> {
        if self.buf.len() < LEN_PREFIX {
            return None;
        }
        let len = u32::from_be_bytes(self.buf[..LEN_PREFIX].try_into().unwrap()) as usize;
        if len > MAX_FRAME_LEN {
            return Some(Err(RootChannelError::FrameTooLarge(len, MAX_FRAME_LEN)));
        }
        if self.buf.len() < LEN_PREFIX + len {
            return None;
        }
        self.buf.advance(LEN_PREFIX);
        let body = self.buf.split_to(len);
        Some(serde_json::from_slice(&body).map_err(RootChannelError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    #[test]
    fn round_trips_one_frame() {
        let frame = encode_frame(&Ping { n: 7 }).unwrap();
        let mut decoder = RootChannelDecoder::new();
        decoder.feed(&frame);
        let out: Ping = decoder.poll_frame().unwrap().unwrap();
        assert_eq!(out, Ping { n: 7 });
    }

    #[test]
    fn partial_frame_yields_nothing_yet() {
        let frame = encode_frame(&Ping { n: 1 }).unwrap();
        let mut decoder = RootChannelDecoder::new();
        decoder.feed(&frame[..frame.len() - 1]);
        assert!(decoder.poll_frame::<Ping>().is_none());
    }
}
