//! Server-facing connection management: `ServerSession` (C4),
//! `CloudConnections` (C5) and `CloudRequest` (C6) from spec §2/§4.4-4.6,
//! plus the live `Server`/`Cloud`/`Channel` types and their rolling
//! statistics (spec §3).

pub mod channel;
pub mod connections;
pub mod request;
pub mod server;
pub mod server_session;

pub use channel::{Channel, ChannelStats, StatsDefaults};
pub use connections::{CloudConnections, CloudConnectionsEvent};
pub use request::{check_access, send_request, CloudRequestError, DEFAULT_MAX_REPEAT_COUNT, DEFAULT_REQUEST_TIMEOUT};
pub use server::{Cloud, CloudError, Server};
pub use server_session::{ServerSessionError, ServerSessionEvent, ServerSessionHandle, ServerSessionState};
