// aether-proto: wire formats and persisted data types for the Aethernet
// client.
//
// Two families of types live here:
// - byte-level wire formats (§6.1 of the protocol design): big-endian,
//   length-prefixed, encoded/decoded by hand with `bytes::{Buf, BufMut}`.
// - serde-derived config/persistence types that never hit the wire directly
//   (`ClientConfig`, `SafeStreamConfig`, ...), shared by `aether-store` and
//   `aether-client`.

pub mod action;
pub mod api;
pub mod config;
pub mod frame;
pub mod registration;
pub mod uid;
pub mod wire;

pub use action::{Action, Poll};
pub use api::{decode_call, decode_event, encode_call, encode_event, AuthorizedCall, ClientSafeEvent};
pub use config::{
    ClientConfig, Endpoint, Protocol, RequestPolicy, SafeStreamConfig, ServerConfig,
    StorageVariant,
};
pub use frame::{SafeFrame, SafeFrameKind, StreamMuxFrame};
pub use registration::{
    FinishReply, IpPorts, PortProto, PowMethod, PowParamsReply, ServerDescriptor, SignatureMethod, SignedKey,
};
pub use uid::{ServerId, Uid};
pub use wire::{WireDecode, WireEncode, WireError};
