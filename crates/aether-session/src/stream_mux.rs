//! `StreamMux` (spec §4.3): multiplexes logical streams over one
//! `CryptoSession`'s plaintext. One `StreamMuxFrame` is one `CryptoSession`
//! plaintext delivery — no further reassembly is needed at this layer.

use std::collections::{HashMap, VecDeque};

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use aether_proto::wire::{RawMuxFrame, WireDecode, WireEncode, WireError};

pub type StreamId = u16;

#[derive(Debug, Error)]
pub enum MuxError {
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// An event surfaced to the owner of a `StreamMux` after decoding an
/// inbound plaintext frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxEvent {
    /// Non-empty payload for `stream_id`; also implicitly opens the stream
    /// if this is its first frame.
    Data { stream_id: StreamId, bytes: Bytes },
    /// A zero-length terminator frame closed `stream_id`.
    Closed { stream_id: StreamId },
}

/// Per-stream inbound queues and closed-stream bookkeeping. Outbound
/// encoding is stateless (just wire framing) and modeled as associated
/// functions so callers don't need a `&mut self` just to build a frame.
#[derive(Default)]
pub struct StreamMux {
    inbound: HashMap<StreamId, VecDeque<Bytes>>,
    closed: std::collections::HashSet<StreamId>,
}

impl StreamMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the plaintext bytes for a write of `payload` on `stream_id`,
    /// to be handed to `CryptoSession::encode_frame`.
    pub fn encode(stream_id: StreamId, payload: Bytes) -> Bytes {
        let frame = RawMuxFrame { stream_id, payload };
        let mut buf = BytesMut::new();
        frame.encode(&mut buf);
        buf.freeze()
    }

    /// Builds a zero-length terminator frame that closes `stream_id`.
    pub fn close_frame(stream_id: StreamId) -> Bytes {
        Self::encode(stream_id, Bytes::new())
    }

    /// Decodes one `CryptoSession` plaintext delivery, routing it to the
    /// named stream's inbound queue (opening the stream lazily) and
    /// returning the event for observability.
    pub fn decode(&mut self, plaintext: Bytes) -> Result<MuxEvent, MuxError> {
        let mut view = plaintext;
        let frame = RawMuxFrame::decode(&mut view)?;
        if frame.payload.is_empty() {
            self.closed.insert(frame.stream_id);
            self.inbound.remove(&frame.stream_id);
            Ok(MuxEvent::Closed { stream_id: frame.stream_id })
        } else {
            self.inbound.entry(frame.stream_id).or_default().push_back(frame.payload.clone());
            Ok(MuxEvent::Data { stream_id: frame.stream_id, bytes: frame.payload })
        }
    }

    /// Pops the next queued inbound chunk for `stream_id`, if any.
    pub fn poll_stream(&mut self, stream_id: StreamId) -> Option<Bytes> {
        self.inbound.get_mut(&stream_id).and_then(VecDeque::pop_front)
    }

    pub fn is_closed(&self, stream_id: StreamId) -> bool {
        self.closed.contains(&stream_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_decode_round_trips_on_same_stream() {
        let mut mux = StreamMux::new();
        let wire = StreamMux::encode(3, Bytes::from_static(b"payload"));
        let event = mux.decode(wire).unwrap();
        assert_eq!(event, MuxEvent::Data { stream_id: 3, bytes: Bytes::from_static(b"payload") });
        assert_eq!(mux.poll_stream(3), Some(Bytes::from_static(b"payload")));
        assert_eq!(mux.poll_stream(3), None);
    }

    #[test]
    fn streams_are_independent() {
        let mut mux = StreamMux::new();
        mux.decode(StreamMux::encode(1, Bytes::from_static(b"a"))).unwrap();
        mux.decode(StreamMux::encode(2, Bytes::from_static(b"b"))).unwrap();
        assert_eq!(mux.poll_stream(1), Some(Bytes::from_static(b"a")));
        assert_eq!(mux.poll_stream(2), Some(Bytes::from_static(b"b")));
    }

    #[test]
    fn zero_length_frame_closes_the_stream() {
        let mut mux = StreamMux::new();
        mux.decode(StreamMux::encode(5, Bytes::from_static(b"x"))).unwrap();
        let event = mux.decode(StreamMux::close_frame(5)).unwrap();
        assert_eq!(event, MuxEvent::Closed { stream_id: 5 });
        assert!(mux.is_closed(5));
        assert_eq!(mux.poll_stream(5), None);
    }

    #[test]
    fn malformed_frame_is_rejected() {
        let mut mux = StreamMux::new();
        assert!(mux.decode(Bytes::from_static(&[0, 1])).is_err());
    }
}
