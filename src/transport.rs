//! Realtime transport capability boundary.
//!
//! The media engine (connect, publish tracks, data channel, speaker
//! notifications) is an external collaborator. This module pins down the
//! exact surface the orchestration layer requires from it — nothing here
//! opens a socket.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::session::activity::ActivityState;

/// One participant entry in an active-speakers update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Speaker {
    pub identity: String,
    pub is_local: bool,
}

/// Local media track kinds the client can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    Microphone,
    Camera,
    ScreenShare,
}

impl TrackSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Microphone => "microphone",
            Self::Camera => "camera",
            Self::ScreenShare => "screen_share",
        }
    }
}

impl std::fmt::Display for TrackSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle, data and activity events emitted by the transport engine.
///
/// Events must be delivered in emission order; the session loop processes
/// them in that order with no reordering buffer.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// The set of currently active speakers changed.
    ActiveSpeakersChanged { speakers: Vec<Speaker> },
    /// The agent published an explicit semantic state. Engines that cannot
    /// map their signal onto a known state drop it instead of guessing.
    AgentStateChanged { state: ActivityState },
    /// Raw bytes arrived on the data channel.
    DataReceived { payload: Vec<u8> },
    /// The engine lost the connection and is re-establishing it.
    Reconnecting,
    /// The engine re-established the connection.
    Reconnected,
    /// The connection is gone for good (until a fresh connect).
    Disconnected { reason: String },
    LocalTrackPublished { source: TrackSource },
    LocalTrackUnpublished { source: TrackSource },
}

/// The transport rejected or failed the connection attempt.
#[derive(Debug, Error)]
#[error("transport connect failed: {0}")]
pub struct ConnectError(pub String);

/// A media toggle (mic/camera/screen) failed at the engine.
#[derive(Debug, Error)]
#[error("media operation failed: {0}")]
pub struct MediaError(pub String);

/// A data-channel send failed. With `reliable = true` the engine must
/// guarantee delivery-or-error — a silent drop is a contract violation.
#[derive(Debug, Error)]
#[error("data send failed: {0}")]
pub struct SendError(pub String);

/// Capability surface the orchestration layer requires from the realtime
/// media engine.
///
/// Implementations wrap one room connection. Consumers stay generic over
/// this trait; the test suite drives a fake.
#[allow(async_fn_in_trait)]
pub trait MediaTransport: Send + Sync {
    async fn connect(&self, url: &str, token: &str) -> Result<(), ConnectError>;

    async fn disconnect(&self);

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), MediaError>;

    async fn set_camera_enabled(&self, enabled: bool) -> Result<(), MediaError>;

    async fn set_screen_share_enabled(&self, enabled: bool) -> Result<(), MediaError>;

    /// Publish bytes on the data channel. `reliable` requests
    /// delivery-or-error semantics.
    async fn send_data(&self, payload: Vec<u8>, reliable: bool) -> Result<(), SendError>;

    /// Subscribe to the room's event stream. Called once per established
    /// connection; the receiver sees events in emission order and closes
    /// when the engine drops the session.
    fn events(&self) -> mpsc::UnboundedReceiver<RoomEvent>;
}
