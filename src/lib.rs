//! uplink-core — realtime session orchestration for a voice assistant client.
//!
//! The rendering layer (web or desktop shell) owns pixels; the media engine
//! owns codecs and sockets. This crate owns everything in between: exchanging
//! a backend origin for a short-lived session credential, driving the
//! transport session lifecycle, deriving the assistant's coarse activity
//! state from room signals, speaking the data-channel envelope protocol, and
//! turning discrete UI actions into reliable sends.
//!
//! The media engine is consumed through the [`transport::MediaTransport`]
//! capability trait; the UI consumes state snapshots plus a pushed
//! [`ipc::UiEvent`] stream.

pub mod config;
pub mod credential;
pub mod ipc;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod transport;

pub use credential::{fetch_credential, CredentialError, SessionCredential};
pub use ipc::{UiEvent, UiSink};
pub use protocol::{decode, Envelope, EnvelopeKind, Inbound, Role};
pub use session::activity::ActivityState;
pub use session::chat::ChatMessage;
pub use session::status::SessionStatus;
pub use session::{Action, DispatchError, SessionContext, SessionError};
pub use transport::{
    ConnectError, MediaError, MediaTransport, RoomEvent, SendError, Speaker, TrackSource,
};
