//! Crate-level error type surfaced to the command layer

use thiserror::Error;

use crate::config::StorageError;
use crate::profile::ValidationError;

#[derive(Error, Debug)]
pub enum TerminalError {
    #[error("Invalid profile: {0}")]
    Validation(#[from] ValidationError),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Session not connected: {0}")]
    NotConnected(String),

    #[error("Profile already has an active session: {0}")]
    AlreadyConnected(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error("Unsupported transport kind: {0}")]
    UnsupportedKind(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport kind cannot change after creation")]
    KindChanged,
}

// Serialized as its message for UI consumption
impl serde::Serialize for TerminalError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
