//! Reference TCP adapter. One `Channel`'s worth of physical link: a plain
//! TCP stream carrying whole frames via the CryptoSession's own length
//! prefix (spec §6.1 framing is connection-oriented; this adapter just
//! ferries bytes — `CryptoSession` does the length-delimiting).

use std::time::Instant;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::{InboundFrame, LinkState, SendAction, Transport, TransportBuilder, TransportError, TransportInfo};

/// Practical ceiling for a single read; real link MTU negotiation is a
/// physical-adapter concern out of scope here (spec §1).
const READ_CHUNK: usize = 64 * 1024;
const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

pub struct TcpTransport {
    stream: TcpStream,
    read_buf: BytesMut,
    state: LinkState,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        TcpTransport {
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            state: LinkState::Linked,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn write(&mut self, bytes: Bytes) -> SendAction {
        match self.stream.write_all(&bytes).await {
            Ok(()) => SendAction::Sent,
            Err(e) => {
                warn!(error = %e, "tcp transport write failed");
                self.state = LinkState::LinkError;
                SendAction::Failed
            }
        }
    }

    async fn read(&mut self) -> Option<InboundFrame> {
        let mut chunk = [0u8; READ_CHUNK];
        match self.stream.read(&mut chunk).await {
            Ok(0) => {
                debug!("tcp transport read EOF");
                self.state = LinkState::Unlinked;
                None
            }
            Ok(n) => {
                self.read_buf.extend_from_slice(&chunk[..n]);
                let bytes = self.read_buf.split().freeze();
                Some(InboundFrame { bytes, recv_time: Instant::now() })
            }
            Err(e) => {
                warn!(error = %e, "tcp transport read failed");
                self.state = LinkState::LinkError;
                None
            }
        }
    }

    fn info(&self) -> TransportInfo {
        TransportInfo {
            link_state: self.state,
            max_packet_size: MAX_PACKET_SIZE,
            reliable: true,
        }
    }
}

pub struct TcpTransportBuilder;

#[async_trait]
impl TransportBuilder for TcpTransportBuilder {
    async fn build(
        &self,
        endpoint: &aether_proto::Endpoint,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let addr = format!("{}:{}", endpoint.host, endpoint.port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| TransportError::Connect(format!("{addr}: {e}")))?;
        let _ = stream.set_nodelay(true);
        Ok(Box::new(TcpTransport::new(stream)))
    }

    fn supports(&self, endpoint: &aether_proto::Endpoint) -> bool {
        matches!(endpoint.protocol, aether_proto::Protocol::Tcp) && !endpoint.is_named()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_transport_round_trips_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut transport = TcpTransport::new(stream);
            let frame = transport.read().await.unwrap();
            assert_eq!(&frame.bytes[..], b"ping");
            transport.write(Bytes::from_static(b"pong")).await;
        });

        let endpoint = aether_proto::Endpoint {
            host: addr.ip().to_string(),
            port: addr.port(),
            protocol: aether_proto::Protocol::Tcp,
        };
        let builder = TcpTransportBuilder;
        let mut client = builder.build(&endpoint).await.unwrap();
        client.write(Bytes::from_static(b"ping")).await;
        let reply = client.read().await.unwrap();
        assert_eq!(&reply.bytes[..], b"pong");

        server.await.unwrap();
    }
}
