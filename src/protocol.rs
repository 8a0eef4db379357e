//! Data-channel envelope protocol.
//!
//! The peer speaks a small field-presence-discriminated JSON dialect:
//! `{"message": "..."}` for plain chat and commands, `{"type": "...",
//! "text": "..."}` for tagged payloads (captions, agent chat, system
//! lines). Decoding is total: anything that fails UTF-8, JSON, or shape
//! checks classifies as [`Inbound::Unrecognized`] and is dropped by the
//! caller — peer data is best-effort and must never crash the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Chat participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Outbound payload kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Plain chat text or a command; serializes as `{"message": text}`.
    Chat,
    /// Caption/transcript fragment; serializes as a tagged payload.
    Caption,
    /// System log line; serializes as a tagged payload.
    System,
}

/// An outbound data-channel payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    pub text: String,
    pub sender_identity: Option<String>,
    pub timestamp_ms: Option<i64>,
}

impl Envelope {
    pub fn chat(text: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::Chat, text)
    }

    pub fn caption(text: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::Caption, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::System, text)
    }

    fn new(kind: EnvelopeKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            sender_identity: None,
            timestamp_ms: None,
        }
    }

    pub fn with_sender(mut self, identity: impl Into<String>) -> Self {
        self.sender_identity = Some(identity.into());
        self
    }

    pub fn at(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    /// Serialize to UTF-8 wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let value = match self.kind {
            EnvelopeKind::Chat => json!({ "message": self.text }),
            EnvelopeKind::Caption => self.tagged("caption"),
            EnvelopeKind::System => self.tagged("system"),
        };
        value.to_string().into_bytes()
    }

    fn tagged(&self, tag: &str) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("type".into(), Value::String(tag.to_string()));
        obj.insert("text".into(), Value::String(self.text.clone()));
        if let Some(sender) = &self.sender_identity {
            obj.insert("sender".into(), Value::String(sender.clone()));
        }
        if let Some(ts) = self.timestamp_ms {
            obj.insert("timestamp".into(), json!(ts));
        }
        Value::Object(obj)
    }
}

/// Classification of an inbound data-channel payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Chat { role: Role, text: String },
    Caption { text: String },
    System { text: String },
    Unrecognized,
}

/// Leading action verbs that mark a free-form payload as a system log line.
const LOG_VERBS: &[&str] = &[
    "Opening", "Closing", "Sent", "Executing", "Executed", "Running", "Saved", "Recalled",
];

fn looks_like_log(text: &str) -> bool {
    let text = text.trim_start();
    LOG_VERBS.iter().any(|verb| text.starts_with(verb))
}

/// Classify inbound wire bytes. Total: malformed or unknown payloads come
/// back as [`Inbound::Unrecognized`], never an error.
pub fn decode(payload: &[u8]) -> Inbound {
    let Ok(text) = std::str::from_utf8(payload) else {
        return Inbound::Unrecognized;
    };
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Inbound::Unrecognized;
    };
    let Some(obj) = value.as_object() else {
        return Inbound::Unrecognized;
    };

    let tag = obj.get("type").and_then(Value::as_str);
    let body = obj.get("text").and_then(Value::as_str);
    let message = obj.get("message").and_then(Value::as_str);

    match tag {
        // Bare `{"message": ...}` is plain chat from the peer.
        None => match message {
            Some(m) => Inbound::Chat {
                role: Role::Assistant,
                text: m.to_string(),
            },
            None => Inbound::Unrecognized,
        },
        Some("caption") | Some("transcription") | Some("agent_text") => match body {
            Some(t) => Inbound::Caption { text: t.to_string() },
            None => Inbound::Unrecognized,
        },
        Some("agent_chat") => match body {
            Some(t) => Inbound::Chat {
                role: Role::Assistant,
                text: t.to_string(),
            },
            None => Inbound::Unrecognized,
        },
        Some("user_chat") => match body {
            Some(t) => Inbound::Chat {
                role: Role::User,
                text: t.to_string(),
            },
            None => Inbound::Unrecognized,
        },
        Some("system") => match body {
            Some(t) => Inbound::System { text: t.to_string() },
            None => Inbound::Unrecognized,
        },
        // Unknown tag: keep it only if it reads like a log line.
        Some(_) => match body.or(message) {
            Some(t) if looks_like_log(t) => Inbound::System { text: t.to_string() },
            _ => Inbound::Unrecognized,
        },
    }
}
