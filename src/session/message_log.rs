//! Session message log
//!
//! Thread-safe, bounded log of everything a session produced:
//! - appended from reader tasks, blocking reader threads and command paths
//! - read by the UI on its own schedule through [`MessageLog::since`]
//! - mirrored to event subscribers as [`SessionEvent::Message`]
//!
//! Sequence numbers are assigned under the write lock, so log order and
//! event order always match.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::VecDeque;
use tokio::sync::broadcast;

use super::types::{MessageKind, SessionEvent, SessionMessage};

/// Default maximum messages kept per session
pub const DEFAULT_MAX_MESSAGES: usize = 10_000;

struct LogState {
    messages: VecDeque<SessionMessage>,
    next_seq: u64,
}

pub struct MessageLog {
    session_id: String,
    state: RwLock<LogState>,
    max_messages: usize,
    events: Option<broadcast::Sender<SessionEvent>>,
}

impl MessageLog {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::with_capacity(session_id, DEFAULT_MAX_MESSAGES, None)
    }

    pub fn with_capacity(
        session_id: impl Into<String>,
        max_messages: usize,
        events: Option<broadcast::Sender<SessionEvent>>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            state: RwLock::new(LogState {
                messages: VecDeque::with_capacity(max_messages.min(1024)),
                next_seq: 0,
            }),
            max_messages: max_messages.max(1),
            events,
        }
    }

    /// Append a message; the oldest entry is evicted when full
    pub fn append(&self, kind: MessageKind, content: impl Into<String>) -> SessionMessage {
        let mut state = self.state.write();

        let message = SessionMessage {
            seq: state.next_seq,
            content: content.into(),
            kind,
            timestamp: Utc::now(),
        };
        state.next_seq += 1;

        if state.messages.len() >= self.max_messages {
            state.messages.pop_front();
        }
        state.messages.push_back(message.clone());

        if let Some(events) = &self.events {
            // No receivers is fine
            let _ = events.send(SessionEvent::Message {
                session_id: self.session_id.clone(),
                message: message.clone(),
            });
        }

        message
    }

    /// Messages with `seq` greater than `after` (all messages for `None`)
    pub fn since(&self, after: Option<u64>) -> Vec<SessionMessage> {
        let state = self.state.read();
        let start = match after {
            Some(seq) => state.messages.partition_point(|m| m.seq <= seq),
            None => 0,
        };
        state.messages.iter().skip(start).cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<SessionMessage> {
        self.since(None)
    }

    pub fn len(&self) -> usize {
        self.state.read().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.state.read().messages.back().map(|m| m.seq)
    }

    /// Concatenated content of all messages of `kind`
    #[cfg(test)]
    pub(crate) fn text_of(&self, kind: MessageKind) -> String {
        self.state
            .read()
            .messages
            .iter()
            .filter(|m| m.kind == kind)
            .map(|m| m.content.as_str())
            .collect()
    }
}
