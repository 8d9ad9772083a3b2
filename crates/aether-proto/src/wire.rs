//! Hand-rolled big-endian wire codec (spec §6.1: "All multi-byte integers
//! are big-endian").
//!
//! No derive macro here on purpose — the frame layouts are bit-level
//! contracts, not free-form serde structures, so each type spells out its
//! own `encode`/`decode`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::uid::{ServerId, Uid};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("buffer too short: need {need} more byte(s)")]
    Truncated { need: usize },
    #[error("trailing {0} unconsumed byte(s)")]
    TrailingBytes(usize),
    #[error("unknown discriminant {0}")]
    UnknownDiscriminant(u8),
    #[error("length field {0} exceeds configured maximum {1}")]
    LengthOverflow(usize, usize),
}

pub trait WireEncode {
    fn encode(&self, buf: &mut BytesMut);
}

pub trait WireDecode: Sized {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError>;
}

pub(crate) fn need(buf: &Bytes, n: usize) -> Result<(), WireError> {
    if buf.remaining() < n {
        Err(WireError::Truncated { need: n - buf.remaining() })
    } else {
        Ok(())
    }
}

pub(crate) fn get_u8(buf: &mut Bytes) -> Result<u8, WireError> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

pub(crate) fn get_u16(buf: &mut Bytes) -> Result<u16, WireError> {
    need(buf, 2)?;
    Ok(buf.get_u16())
}

pub(crate) fn get_u32(buf: &mut Bytes) -> Result<u32, WireError> {
    need(buf, 4)?;
    Ok(buf.get_u32())
}

pub(crate) fn get_bytes(buf: &mut Bytes, len: usize) -> Result<Bytes, WireError> {
    need(buf, len)?;
    Ok(buf.copy_to_bytes(len))
}

/// Read a `u16`-length-prefixed byte string.
pub(crate) fn get_len16_bytes(buf: &mut Bytes) -> Result<Bytes, WireError> {
    let len = get_u16(buf)? as usize;
    get_bytes(buf, len)
}

pub(crate) fn put_len16_bytes(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u16(data.len() as u16);
    buf.put_slice(data);
}

impl WireEncode for Uid {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }
}

impl WireDecode for Uid {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let bytes = get_bytes(buf, 16)?;
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(Uid::new(arr))
    }
}

impl WireEncode for ServerId {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.0);
    }
}

impl WireDecode for ServerId {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        Ok(ServerId(get_u16(buf)?))
    }
}

/// Top-level multiplexing frame (spec §6.1):
/// `uint16 be stream_id, uint16 be payload_len, bytes[payload_len] payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMuxFrame {
    pub stream_id: u16,
    pub payload: Bytes,
}

impl WireEncode for RawMuxFrame {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.stream_id);
        put_len16_bytes(buf, &self.payload);
    }
}

impl WireDecode for RawMuxFrame {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let stream_id = get_u16(buf)?;
        let payload = get_len16_bytes(buf)?;
        Ok(RawMuxFrame { stream_id, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_mux_frame_round_trips() {
        let frame = RawMuxFrame {
            stream_id: 7,
            payload: Bytes::from_static(b"hello"),
        };
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        let mut view = buf.freeze();
        let decoded = RawMuxFrame::decode(&mut view).unwrap();
        assert_eq!(decoded, frame);
        assert!(view.is_empty());
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let mut buf = Bytes::from_static(&[0, 1, 0, 5, b'h', b'i']);
        assert!(matches!(
            RawMuxFrame::decode(&mut buf),
            Err(WireError::Truncated { .. })
        ));
    }
}
