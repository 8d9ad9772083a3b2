//! `StreamMuxFrame` (C3) and `SafeFrame` (C7) wire layouts, spec §6.1.

use bytes::{Bytes, BytesMut};

pub use crate::wire::RawMuxFrame as StreamMuxFrame;
use crate::wire::{get_bytes, get_u16, get_u8, WireDecode, WireEncode, WireError};

/// `SafeFrame := uint8 kind, payload` — carried inside the user `data` of
/// `send_message`/`send_message_event`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafeFrame {
    Data {
        seq: u16,
        offset: u16,
        total: u16,
        bytes: Bytes,
    },
    Ack {
        seq_first: u16,
        seq_last: u16,
    },
    Nack {
        seq: u16,
    },
    Init {
        initial_seq: u16,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SafeFrameKind {
    Data = 0,
    Ack = 1,
    Nack = 2,
    Init = 3,
}

impl SafeFrame {
    pub fn kind(&self) -> SafeFrameKind {
        match self {
            SafeFrame::Data { .. } => SafeFrameKind::Data,
            SafeFrame::Ack { .. } => SafeFrameKind::Ack,
            SafeFrame::Nack { .. } => SafeFrameKind::Nack,
            SafeFrame::Init { .. } => SafeFrameKind::Init,
        }
    }
}

impl WireEncode for SafeFrame {
    fn encode(&self, buf: &mut BytesMut) {
        use bytes::BufMut;
        buf.put_u8(self.kind() as u8);
        match self {
            SafeFrame::Data { seq, offset, total, bytes } => {
                buf.put_u16(*seq);
                buf.put_u16(*offset);
                buf.put_u16(*total);
                buf.put_u16(bytes.len() as u16);
                buf.put_slice(bytes);
            }
            SafeFrame::Ack { seq_first, seq_last } => {
                buf.put_u16(*seq_first);
                buf.put_u16(*seq_last);
            }
            SafeFrame::Nack { seq } => buf.put_u16(*seq),
            SafeFrame::Init { initial_seq } => buf.put_u16(*initial_seq),
        }
    }
}

impl WireDecode for SafeFrame {
    fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        let kind = get_u8(buf)?;
        match kind {
            0 => {
                let seq = get_u16(buf)?;
                let offset = get_u16(buf)?;
                let total = get_u16(buf)?;
                let len = get_u16(buf)? as usize;
                let bytes = get_bytes(buf, len)?;
                Ok(SafeFrame::Data { seq, offset, total, bytes })
            }
            1 => {
                let seq_first = get_u16(buf)?;
                let seq_last = get_u16(buf)?;
                Ok(SafeFrame::Ack { seq_first, seq_last })
            }
            2 => Ok(SafeFrame::Nack { seq: get_u16(buf)? }),
            3 => Ok(SafeFrame::Init { initial_seq: get_u16(buf)? }),
            other => Err(WireError::UnknownDiscriminant(other)),
        }
    }
}

/// Decode a single `SafeFrame` and report a trailing-bytes error if the
/// buffer isn't fully consumed — callers that expect exactly one frame per
/// `send_message` payload use this instead of bare `decode`.
pub fn decode_exact(mut bytes: Bytes) -> Result<SafeFrame, WireError> {
    let frame = SafeFrame::decode(&mut bytes)?;
    if !bytes.is_empty() {
        return Err(WireError::TrailingBytes(bytes.len()));
    }
    Ok(frame)
}
