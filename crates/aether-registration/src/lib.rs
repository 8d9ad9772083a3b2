//! Client registration (C10, spec §4.10): a one-shot handshake against the
//! registration cloud that turns a `parent_uid` into a fully usable
//! `ClientConfig` — assigned uid, ephemeral uid, master key, and resolved
//! server cloud.

mod handshake;
mod messages;
mod root_channel;

pub use handshake::{register, RegistrationError, RegistrationParams};
pub use messages::{RootCall, RootReply};
