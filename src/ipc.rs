//! UI-facing event surface.
//!
//! Events serialize as `{"event": "<name>", "data": {...}}` so the
//! embedding shell can forward them to its renderer as-is. Delivery is an
//! in-process unbounded channel; a closed receiver means the UI is gone
//! and the event is silently dropped.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::session::activity::ActivityState;
use crate::session::chat::ChatMessage;

/// All events pushed up to the UI layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum UiEvent {
    /// Session status changed.
    Status {
        state: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Assistant activity changed.
    Activity { state: ActivityState },
    /// Caption text changed; `None` clears the caption.
    Caption {
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// A chat entry was appended.
    Chat { message: ChatMessage },
    /// Latest system log line (only the most recent is meaningful).
    SystemLog { text: String },
    /// Transient notification.
    Toast { message: String },
    /// A local media track flipped on or off.
    MediaState { source: String, active: bool },
    /// A user-visible error (credential/connect failures).
    Error { message: String },
}

/// Sender half handed to the session core.
pub type UiSink = mpsc::UnboundedSender<UiEvent>;

/// Create the UI event channel.
pub fn channel() -> (UiSink, mpsc::UnboundedReceiver<UiEvent>) {
    mpsc::unbounded_channel()
}

/// Send an event to the UI, ignoring a disconnected receiver.
pub fn emit(sink: &UiSink, event: UiEvent) {
    let _ = sink.send(event);
}
