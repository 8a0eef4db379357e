//! Assistant activity derivation.
//!
//! The UI shows one coarse state: idle, listening, thinking, speaking.
//! When the agent publishes its semantic state we adopt it verbatim.
//! Without that signal the only observable proxy is remote audio activity,
//! so the fallback maps "a remote participant is speaking" to `Speaking`
//! and nothing else — it never invents `Listening` or `Thinking`, which
//! would flicker on ambiguous signals.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Coarse assistant activity shown in the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ActivityState {
    Idle = 0,
    Listening = 1,
    Thinking = 2,
    Speaking = 3,
}

impl ActivityState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Listening,
            2 => Self::Thinking,
            3 => Self::Speaking,
            _ => Self::Idle,
        }
    }

    /// Parse an engine-supplied state name. Unknown names yield `None` so
    /// adapters drop them instead of guessing.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "idle" => Some(Self::Idle),
            "listening" => Some(Self::Listening),
            "thinking" => Some(Self::Thinking),
            "speaking" => Some(Self::Speaking),
            _ => None,
        }
    }
}

impl std::fmt::Display for ActivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Thinking => write!(f, "thinking"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

/// Fallback transition applied on every active-speakers update.
///
/// Pure and synchronous: the state is a function of the previous state and
/// the latest event only. No timers, no hysteresis.
pub fn speakers_transition(prev: ActivityState, any_remote_speaker: bool) -> ActivityState {
    if any_remote_speaker {
        ActivityState::Speaking
    } else if prev == ActivityState::Speaking {
        ActivityState::Idle
    } else {
        prev
    }
}

/// Thread-safe activity holder, shareable across the session tasks.
#[derive(Debug)]
pub struct ActivityTracker {
    state: AtomicU8,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ActivityState::Idle as u8),
        }
    }

    pub fn current(&self) -> ActivityState {
        ActivityState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Adopt an explicit agent-state signal verbatim. Returns `true` when
    /// the state actually changed.
    pub fn adopt(&self, state: ActivityState) -> bool {
        self.state.swap(state as u8, Ordering::AcqRel) != state as u8
    }

    /// Apply the speaker fallback. Returns the new state when it changed.
    pub fn on_speakers_changed(&self, any_remote_speaker: bool) -> Option<ActivityState> {
        let prev = self.current();
        let next = speakers_transition(prev, any_remote_speaker);
        if next != prev {
            self.state.store(next as u8, Ordering::Release);
            Some(next)
        } else {
            None
        }
    }

    pub fn reset(&self) {
        self.state.store(ActivityState::Idle as u8, Ordering::Release);
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}
