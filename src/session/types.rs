//! Session Types and Data Structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::profile::TransportKind;

/// Category of a message log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Bytes read from the transport
    Received,
    /// Data written by the caller
    Sent,
    /// Lifecycle notices (connected, disconnected)
    System,
    Error,
    Warning,
    Info,
}

/// One entry in a session's message log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMessage {
    /// Position in the log, strictly increasing per session
    pub seq: u64,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
}

/// Why a session stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "camelCase")]
pub enum DisconnectReason {
    /// Closed by the caller
    Closed,
    /// The remote side or process ended the stream
    EndOfStream,
    /// A read failed
    Error(String),
}

impl DisconnectReason {
    /// Whether the loss was unexpected (eligible for auto-reconnect)
    pub fn is_unexpected(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}

/// Events pushed to subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SessionEvent {
    Connected {
        session_id: String,
        profile_id: String,
    },
    /// A message was appended to a session log
    Message {
        session_id: String,
        message: SessionMessage,
    },
    Disconnected {
        session_id: String,
        profile_id: String,
        reason: DisconnectReason,
    },
    /// Auto-reconnect is about to try again
    Reconnecting {
        profile_id: String,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
    },
    /// Auto-reconnect gave up
    ReconnectFailed {
        profile_id: String,
        attempts: u32,
    },
}

/// Read-only snapshot of a session for callers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub profile_id: String,
    pub profile_name: String,
    pub kind: TransportKind,
    pub endpoint: String,
    pub created_at: DateTime<Utc>,
    pub connected: bool,
    pub message_count: usize,
    /// Sequence number of the newest message, if any
    pub last_seq: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_expectedness() {
        assert!(!DisconnectReason::Closed.is_unexpected());
        assert!(DisconnectReason::EndOfStream.is_unexpected());
        assert!(DisconnectReason::Error("reset".to_string()).is_unexpected());
    }

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::Disconnected {
            session_id: "s".to_string(),
            profile_id: "p".to_string(),
            reason: DisconnectReason::Closed,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "disconnected");
        assert_eq!(value["sessionId"], "s");
        assert_eq!(value["profileId"], "p");
        assert_eq!(value["reason"]["type"], "closed");

        let event = SessionEvent::Reconnecting {
            profile_id: "p".to_string(),
            attempt: 1,
            max_attempts: 3,
            delay_ms: 1000,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "reconnecting");
        assert_eq!(value["maxAttempts"], 3);
        assert_eq!(value["delayMs"], 1000);

        let reason = serde_json::to_value(DisconnectReason::EndOfStream).unwrap();
        assert_eq!(reason["type"], "endOfStream");
    }

    #[test]
    fn test_info_uses_camel_case() {
        let info = SessionInfo {
            id: "s".to_string(),
            profile_id: "p".to_string(),
            profile_name: "lab".to_string(),
            kind: TransportKind::Raw,
            endpoint: "127.0.0.1:23".to_string(),
            created_at: Utc::now(),
            connected: true,
            message_count: 2,
            last_seq: Some(1),
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["profileId"], "p");
        assert_eq!(value["messageCount"], 2);
        assert_eq!(value["lastSeq"], 1);
        assert!(value.get("profile_id").is_none());
    }
}
