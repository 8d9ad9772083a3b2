//! `CryptoSession` and `StreamMux` (spec §4.2, §4.3): the sans-IO framing
//! layer between a `Transport` and a `ServerSession`'s authorized-API
//! dispatcher.

pub mod crypto_session;
pub mod stream_mux;

pub use crypto_session::{CryptoSession, CryptoSessionError};
pub use stream_mux::{MuxError, MuxEvent, StreamId, StreamMux};
