//! An in-memory duplex `Transport` pair, for tests that need to drive the
//! protocol layers above `Transport` (registration, `ServerSession`,
//! `SafeStream`) without a real socket.

use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use aether_transport::{InboundFrame, LinkState, SendAction, Transport, TransportInfo};

/// One end of an in-memory socketpair. `write` hands a whole frame to the
/// peer's `read`; there's no byte-stream coalescing the way a real TCP
/// adapter has, so tests that exercise `CryptoSession`'s reassembly
/// against split writes should drive it directly rather than through this.
pub struct MockTransport {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
    max_packet_size: usize,
}

impl MockTransport {
    /// Builds a connected pair: writes on one side arrive as reads on the
    /// other.
    pub fn pair() -> (MockTransport, MockTransport) {
        Self::pair_with_max_packet_size(16 * 1024 * 1024)
    }

    pub fn pair_with_max_packet_size(max_packet_size: usize) -> (MockTransport, MockTransport) {
        let (tx_a, rx_b) = mpsc::unbounded_channel();
        let (tx_b, rx_a) = mpsc::unbounded_channel();
        (
            MockTransport { tx: tx_a, rx: rx_a, max_packet_size },
            MockTransport { tx: tx_b, rx: rx_b, max_packet_size },
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&mut self, bytes: Bytes) -> SendAction {
        match self.tx.send(bytes) {
            Ok(()) => SendAction::Sent,
            Err(_) => SendAction::Failed,
        }
    }

    async fn read(&mut self) -> Option<InboundFrame> {
        self.rx.recv().await.map(|bytes| InboundFrame { bytes, recv_time: Instant::now() })
    }

    fn info(&self) -> TransportInfo {
        TransportInfo {
            link_state: LinkState::Linked,
            max_packet_size: self.max_packet_size,
            reliable: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_round_trips_frames_in_both_directions() {
        let (mut a, mut b) = MockTransport::pair();
        assert_eq!(a.write(Bytes::from_static(b"ping")).await, SendAction::Sent);
        let frame = b.read().await.unwrap();
        assert_eq!(&frame.bytes[..], b"ping");

        assert_eq!(b.write(Bytes::from_static(b"pong")).await, SendAction::Sent);
        let frame = a.read().await.unwrap();
        assert_eq!(&frame.bytes[..], b"pong");
    }

    #[tokio::test]
    async fn dropping_the_peer_ends_reads() {
        let (a, mut b) = MockTransport::pair();
        drop(a);
        assert!(b.read().await.is_none());
    }
}
