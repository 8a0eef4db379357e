//! Session status and reconnection supervision.
//!
//! `SessionStatus` is the single source of truth for "can I send". The
//! supervisor reacts to the transport's reconnect signals with a pure
//! transition table; it never reconnects on its own — leaving `Offline`
//! requires a fresh credential cycle initiated by the user.

use std::sync::Mutex;

/// Connection status of the one active UI session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Connecting,
    Online,
    Reconnecting,
    Offline,
    Errored(String),
}

impl SessionStatus {
    /// Sends are attempted while online or degraded-but-recovering; the
    /// transport is expected to buffer or fail fast while reconnecting.
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Online | Self::Reconnecting)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Online => "online",
            Self::Reconnecting => "reconnecting",
            Self::Offline => "offline",
            Self::Errored(_) => "errored",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Errored(reason) => Some(reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Errored(reason) => write!(f, "errored: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Connectivity signals the supervisor reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSignal {
    Reconnecting,
    Reconnected,
    Disconnected,
}

/// Pure supervisor transition table.
pub fn next_status(current: &SessionStatus, signal: LinkSignal) -> SessionStatus {
    match (current, signal) {
        (SessionStatus::Online, LinkSignal::Reconnecting) => SessionStatus::Reconnecting,
        (SessionStatus::Reconnecting, LinkSignal::Reconnected) => SessionStatus::Online,
        (_, LinkSignal::Disconnected) => SessionStatus::Offline,
        (current, _) => current.clone(),
    }
}

/// Shared mutable status holder.
#[derive(Debug)]
pub struct StatusCell {
    inner: Mutex<SessionStatus>,
}

impl StatusCell {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SessionStatus::Uninitialized),
        }
    }

    pub fn get(&self) -> SessionStatus {
        self.inner.lock().unwrap().clone()
    }

    /// Replace the status. Returns `true` when it actually changed.
    pub fn set(&self, status: SessionStatus) -> bool {
        let mut guard = self.inner.lock().unwrap();
        if *guard == status {
            false
        } else {
            *guard = status;
            true
        }
    }

    /// Apply a supervisor signal. Returns the new status when it changed.
    pub fn apply(&self, signal: LinkSignal) -> Option<SessionStatus> {
        let mut guard = self.inner.lock().unwrap();
        let next = next_status(&guard, signal);
        if next != *guard {
            *guard = next.clone();
            Some(next)
        } else {
            None
        }
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}
