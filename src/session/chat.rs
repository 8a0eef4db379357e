//! Transient chat transcript for the active session.
//!
//! Append-only, ordered by arrival (inbound) or send (outbound). A send
//! that failed after the optimistic append stays in the log marked
//! `failed` — entries are never retracted.

use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::protocol::Role;

/// One chat transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub timestamp_ms: i64,
    pub failed: bool,
}

/// Append-only chat log, cleared when the session ends.
#[derive(Debug, Default)]
pub struct ChatLog {
    entries: Mutex<Vec<ChatMessage>>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return a copy for UI delivery.
    pub fn append(&self, role: Role, text: &str, failed: bool) -> ChatMessage {
        let message = ChatMessage {
            id: next_id(),
            role,
            text: text.to_string(),
            timestamp_ms: Utc::now().timestamp_millis(),
            failed,
        };
        self.entries.lock().unwrap().push(message.clone());
        message
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

fn next_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("msg-{}", &hex[..12])
}
