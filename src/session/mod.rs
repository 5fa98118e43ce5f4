//! Session Management Module
//!
//! - [`SessionMultiplexer`] opens, supervises and closes sessions
//! - [`MessageLog`] is the bounded, sequenced per-session log
//! - [`ProfileReconnector`] retries lost connections with backoff

mod entry;
mod message_log;
mod multiplexer;
mod reconnect;
pub mod types;

pub use entry::Session;
pub use message_log::{MessageLog, DEFAULT_MAX_MESSAGES};
pub use multiplexer::SessionMultiplexer;
pub use reconnect::{ProfileReconnector, ReconnectConfig, ReconnectError};
pub use types::{DisconnectReason, MessageKind, SessionEvent, SessionInfo, SessionMessage};
