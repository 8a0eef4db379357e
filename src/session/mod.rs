//! Session orchestration: lifecycle, room-event loop, command dispatch.
//!
//! One `SessionContext` per UI session, with an explicit init/teardown
//! lifecycle — no ambient globals. The context fetches a credential,
//! connects the transport, then processes the room's event stream strictly
//! in arrival order. Teardown aborts every task it spawned so no event is
//! ever delivered into a dead UI context.

pub mod activity;
pub mod chat;
pub mod status;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, DEFAULT_BACKEND_URL};
use crate::credential::{self, CredentialError, SessionCredential};
use crate::ipc::{self, UiEvent, UiSink};
use crate::protocol::{self, Envelope, Inbound, Role};
use crate::transport::{
    ConnectError, MediaError, MediaTransport, RoomEvent, SendError, TrackSource,
};

use activity::{ActivityState, ActivityTracker};
use chat::{ChatLog, ChatMessage};
use status::{LinkSignal, SessionStatus, StatusCell};

/// Caption visibility window: a caption with no follow-up clears itself.
const CAPTION_TTL: Duration = Duration::from_secs(5);

/// Wire text carrying a named system command to the agent.
fn command_text(name: &str) -> String {
    format!("Execute system command: {name}")
}

/// Discrete UI actions routed through the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ToggleMic,
    ToggleCamera,
    ToggleScreenShare,
    RunNamedCommand(String),
    SendFreeText(String),
}

/// Why a dispatched action failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no active session")]
    NotConnected,
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Why a connect attempt failed.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
}

/// Media toggle kinds, each with its own in-flight guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Mic,
    Camera,
    Screen,
}

impl MediaKind {
    fn source(self) -> TrackSource {
        match self {
            Self::Mic => TrackSource::Microphone,
            Self::Camera => TrackSource::Camera,
            Self::Screen => TrackSource::ScreenShare,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Mic => "Microphone",
            Self::Camera => "Camera",
            Self::Screen => "Screen share",
        }
    }
}

#[derive(Debug, Default)]
struct MediaFlags {
    mic_on: AtomicBool,
    cam_on: AtomicBool,
    screen_on: AtomicBool,
    mic_pending: AtomicBool,
    cam_pending: AtomicBool,
    screen_pending: AtomicBool,
}

impl MediaFlags {
    fn flag(&self, kind: MediaKind) -> &AtomicBool {
        match kind {
            MediaKind::Mic => &self.mic_on,
            MediaKind::Camera => &self.cam_on,
            MediaKind::Screen => &self.screen_on,
        }
    }

    fn pending(&self, kind: MediaKind) -> &AtomicBool {
        match kind {
            MediaKind::Mic => &self.mic_pending,
            MediaKind::Camera => &self.cam_pending,
            MediaKind::Screen => &self.screen_pending,
        }
    }

    fn reset(&self) {
        for flag in [
            &self.mic_on,
            &self.cam_on,
            &self.screen_on,
            &self.mic_pending,
            &self.cam_pending,
            &self.screen_pending,
        ] {
            flag.store(false, Ordering::SeqCst);
        }
    }
}

/// State shared between the context, the room loop, and timer tasks.
struct SharedState {
    status: StatusCell,
    activity: ActivityTracker,
    caption: Mutex<Option<String>>,
    caption_gen: AtomicU64,
    chat: ChatLog,
    last_system_log: Mutex<Option<String>>,
    media: MediaFlags,
}

impl SharedState {
    fn new() -> Self {
        Self {
            status: StatusCell::new(),
            activity: ActivityTracker::new(),
            caption: Mutex::new(None),
            caption_gen: AtomicU64::new(0),
            chat: ChatLog::new(),
            last_system_log: Mutex::new(None),
            media: MediaFlags::default(),
        }
    }
}

/// One UI session's orchestration context.
pub struct SessionContext<T: MediaTransport> {
    transport: Arc<T>,
    state: Arc<SharedState>,
    ui: UiSink,
    http: reqwest::Client,
    /// Bumped on every connect/teardown; async completions from a previous
    /// epoch are discarded without UI effects.
    epoch: Arc<AtomicU64>,
    /// Disposer list: every task spawned for the active session, aborted on
    /// teardown.
    tasks: Mutex<Vec<JoinHandle<()>>>,
    config: Mutex<ClientConfig>,
}

impl<T: MediaTransport> SessionContext<T> {
    pub fn new(transport: Arc<T>, config: ClientConfig, ui: UiSink) -> Self {
        Self {
            transport,
            state: Arc::new(SharedState::new()),
            ui,
            http: reqwest::Client::new(),
            epoch: Arc::new(AtomicU64::new(0)),
            tasks: Mutex::new(Vec::new()),
            config: Mutex::new(config),
        }
    }

    // -- UI-facing state snapshots --

    pub fn status(&self) -> SessionStatus {
        self.state.status.get()
    }

    pub fn activity(&self) -> ActivityState {
        self.state.activity.current()
    }

    pub fn caption(&self) -> Option<String> {
        self.state.caption.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.chat.snapshot()
    }

    pub fn last_system_log(&self) -> Option<String> {
        self.state.last_system_log.lock().unwrap().clone()
    }

    pub fn microphone_on(&self) -> bool {
        self.state.media.mic_on.load(Ordering::SeqCst)
    }

    pub fn camera_on(&self) -> bool {
        self.state.media.cam_on.load(Ordering::SeqCst)
    }

    pub fn screen_share_on(&self) -> bool {
        self.state.media.screen_on.load(Ordering::SeqCst)
    }

    // -- lifecycle --

    /// Establish a session: resolve the backend origin, exchange it for a
    /// credential, connect the transport, start the room-event loop.
    ///
    /// A credential failure leaves the status back at `Uninitialized` (the
    /// session never existed); a transport failure parks it at `Errored`.
    /// Both surface to the UI and support manual retry.
    pub async fn connect(&self, backend_override: Option<&str>) -> Result<(), SessionError> {
        let current = self.status();
        if matches!(
            current,
            SessionStatus::Connecting | SessionStatus::Online | SessionStatus::Reconnecting
        ) {
            warn!(status = %current, "Connect requested while a session is active; ignoring");
            return Ok(());
        }

        self.set_status(SessionStatus::Connecting);

        let configured = {
            let config = self.config.lock().unwrap();
            backend_override
                .map(str::to_string)
                .or_else(|| config.backend_url.clone())
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string())
        };
        let base = credential::resolve_backend_url(&configured);
        info!(backend = %base, "Fetching session credential");

        let cred = match credential::fetch_credential(&self.http, &base).await {
            Ok(cred) => cred,
            Err(e) => {
                warn!(error = %e, "Credential fetch failed");
                self.set_status(SessionStatus::Uninitialized);
                ipc::emit(&self.ui, UiEvent::Error { message: e.to_string() });
                return Err(e.into());
            }
        };

        self.establish(&cred).await
    }

    async fn establish(&self, cred: &SessionCredential) -> Result<(), SessionError> {
        if let Err(e) = self.transport.connect(&cred.transport_url, &cred.token).await {
            warn!(error = %e, "Transport connect failed");
            self.set_status(SessionStatus::Errored(e.to_string()));
            ipc::emit(&self.ui, UiEvent::Error { message: e.to_string() });
            return Err(e.into());
        }

        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.set_status(SessionStatus::Online);
        info!("Session established");

        let events = self.transport.events();
        let handle = tokio::spawn(room_loop(events, self.state.clone(), self.ui.clone()));
        self.tasks.lock().unwrap().push(handle);

        // Default media posture: microphone live, camera and screen off.
        match self.transport.set_microphone_enabled(true).await {
            Ok(()) => {
                self.state.media.mic_on.store(true, Ordering::SeqCst);
                ipc::emit(
                    &self.ui,
                    UiEvent::MediaState {
                        source: TrackSource::Microphone.as_str().to_string(),
                        active: true,
                    },
                );
            }
            Err(e) => {
                warn!(error = %e, "Default microphone enable failed");
                self.toast(format!("Microphone unavailable: {e}"));
            }
        }

        Ok(())
    }

    /// Tear the session down: abort all listener tasks, disconnect the
    /// transport, clear session-owned state.
    pub async fn disconnect(&self) {
        info!("Tearing down session");
        self.epoch.fetch_add(1, Ordering::SeqCst);

        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }

        self.transport.disconnect().await;

        self.state.caption_gen.fetch_add(1, Ordering::SeqCst);
        *self.state.caption.lock().unwrap() = None;
        *self.state.last_system_log.lock().unwrap() = None;
        self.state.chat.clear();
        self.state.activity.reset();
        self.state.media.reset();
        self.set_status(SessionStatus::Uninitialized);
    }

    // -- command dispatch --

    pub async fn dispatch(&self, action: Action) -> Result<(), DispatchError> {
        match action {
            Action::ToggleMic => self.toggle_media(MediaKind::Mic).await,
            Action::ToggleCamera => self.toggle_media(MediaKind::Camera).await,
            Action::ToggleScreenShare => self.toggle_media(MediaKind::Screen).await,
            Action::SendFreeText(text) => self.send_free_text(&text).await,
            Action::RunNamedCommand(name) => self.run_named_command(&name).await,
        }
    }

    async fn toggle_media(&self, kind: MediaKind) -> Result<(), DispatchError> {
        if !self.status().can_send() {
            self.toast("System offline");
            return Err(DispatchError::NotConnected);
        }

        let media = &self.state.media;
        // Coalesce: a second toggle of the same kind while one is in flight
        // must not race a second engine call.
        if media.pending(kind).swap(true, Ordering::SeqCst) {
            debug!(kind = kind.label(), "Coalescing duplicate in-flight toggle");
            return Ok(());
        }

        let target = !media.flag(kind).load(Ordering::SeqCst);
        let epoch = self.epoch.load(Ordering::SeqCst);
        let result = match kind {
            MediaKind::Mic => self.transport.set_microphone_enabled(target).await,
            MediaKind::Camera => self.transport.set_camera_enabled(target).await,
            MediaKind::Screen => self.transport.set_screen_share_enabled(target).await,
        };
        media.pending(kind).store(false, Ordering::SeqCst);

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(kind = kind.label(), "Discarding stale toggle completion");
            return Ok(());
        }

        match result {
            Ok(()) => {
                media.flag(kind).store(target, Ordering::SeqCst);
                ipc::emit(
                    &self.ui,
                    UiEvent::MediaState {
                        source: kind.source().as_str().to_string(),
                        active: target,
                    },
                );
                self.toast(format!(
                    "{} {}",
                    kind.label(),
                    if target { "on" } else { "off" }
                ));
                Ok(())
            }
            Err(e) => {
                warn!(kind = kind.label(), error = %e, "Media toggle failed");
                self.toast(format!("{} toggle failed", kind.label()));
                Err(e.into())
            }
        }
    }

    async fn send_free_text(&self, text: &str) -> Result<(), DispatchError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        if !self.status().can_send() {
            self.toast("System offline");
            return Err(DispatchError::NotConnected);
        }

        let payload = Envelope::chat(trimmed).encode();
        let epoch = self.epoch.load(Ordering::SeqCst);
        let result = self.transport.send_data(payload, true).await;

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Discarding stale send completion");
            return Ok(());
        }

        match result {
            Ok(()) => {
                let message = self.state.chat.append(Role::User, trimmed, false);
                ipc::emit(&self.ui, UiEvent::Chat { message });
                Ok(())
            }
            Err(e) => {
                // Mark-as-failed, never retract: the entry stays visible.
                warn!(error = %e, "Chat send failed");
                let message = self.state.chat.append(Role::User, trimmed, true);
                ipc::emit(&self.ui, UiEvent::Chat { message });
                self.toast("Transmission failed");
                Err(e.into())
            }
        }
    }

    async fn run_named_command(&self, name: &str) -> Result<(), DispatchError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(());
        }
        if !self.status().can_send() {
            self.toast("System offline");
            return Err(DispatchError::NotConnected);
        }

        let payload = Envelope::chat(command_text(name)).encode();
        let epoch = self.epoch.load(Ordering::SeqCst);
        let result = self.transport.send_data(payload, true).await;

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("Discarding stale command completion");
            return Ok(());
        }

        match result {
            Ok(()) => {
                self.toast(format!("Sent: {name}"));
                Ok(())
            }
            Err(e) => {
                warn!(command = name, error = %e, "Command send failed");
                self.toast(format!("Command failed: {name}"));
                Err(e.into())
            }
        }
    }

    // -- helpers --

    fn set_status(&self, status: SessionStatus) {
        if self.state.status.set(status.clone()) {
            emit_status(&self.ui, &status);
        }
    }

    fn toast(&self, message: impl Into<String>) {
        ipc::emit(
            &self.ui,
            UiEvent::Toast {
                message: message.into(),
            },
        );
    }
}

fn emit_status(ui: &UiSink, status: &SessionStatus) {
    ipc::emit(
        ui,
        UiEvent::Status {
            state: status.label().to_string(),
            reason: status.reason().map(str::to_string),
        },
    );
}

/// Consume the transport's event stream in emission order.
async fn room_loop(
    mut events: mpsc::UnboundedReceiver<RoomEvent>,
    state: Arc<SharedState>,
    ui: UiSink,
) {
    while let Some(event) = events.recv().await {
        handle_room_event(event, &state, &ui);
    }
    debug!("Room event stream ended");
}

fn handle_room_event(event: RoomEvent, state: &Arc<SharedState>, ui: &UiSink) {
    match event {
        RoomEvent::AgentStateChanged { state: next } => {
            if state.activity.adopt(next) {
                ipc::emit(ui, UiEvent::Activity { state: next });
            }
        }
        RoomEvent::ActiveSpeakersChanged { speakers } => {
            let any_remote = speakers.iter().any(|s| !s.is_local);
            if let Some(next) = state.activity.on_speakers_changed(any_remote) {
                ipc::emit(ui, UiEvent::Activity { state: next });
            }
        }
        RoomEvent::DataReceived { payload } => match protocol::decode(&payload) {
            Inbound::Chat { role, text } => {
                let message = state.chat.append(role, &text, false);
                ipc::emit(ui, UiEvent::Chat { message });
            }
            Inbound::Caption { text } => {
                set_caption(state, ui, text);
            }
            Inbound::System { text } => {
                *state.last_system_log.lock().unwrap() = Some(text.clone());
                ipc::emit(ui, UiEvent::SystemLog { text });
            }
            Inbound::Unrecognized => {
                debug!("Dropping unrecognized data payload");
            }
        },
        RoomEvent::Reconnecting => {
            apply_link_signal(state, ui, LinkSignal::Reconnecting);
        }
        RoomEvent::Reconnected => {
            apply_link_signal(state, ui, LinkSignal::Reconnected);
        }
        RoomEvent::Disconnected { reason } => {
            info!(reason = %reason, "Transport disconnected");
            apply_link_signal(state, ui, LinkSignal::Disconnected);
            if state.activity.adopt(ActivityState::Idle) {
                ipc::emit(
                    ui,
                    UiEvent::Activity {
                        state: ActivityState::Idle,
                    },
                );
            }
        }
        RoomEvent::LocalTrackPublished { source } => {
            set_media_flag(state, ui, source, true);
        }
        RoomEvent::LocalTrackUnpublished { source } => {
            set_media_flag(state, ui, source, false);
        }
    }
}

/// Show a caption and arm its self-clear timer. A newer caption bumps the
/// generation counter, which disarms every older timer.
fn set_caption(state: &Arc<SharedState>, ui: &UiSink, text: String) {
    let generation = state.caption_gen.fetch_add(1, Ordering::SeqCst) + 1;
    *state.caption.lock().unwrap() = Some(text.clone());
    ipc::emit(ui, UiEvent::Caption { text: Some(text) });

    let state = state.clone();
    let ui = ui.clone();
    tokio::spawn(async move {
        tokio::time::sleep(CAPTION_TTL).await;
        if state.caption_gen.load(Ordering::SeqCst) == generation {
            *state.caption.lock().unwrap() = None;
            ipc::emit(&ui, UiEvent::Caption { text: None });
        }
    });
}

fn apply_link_signal(state: &SharedState, ui: &UiSink, signal: LinkSignal) {
    if let Some(next) = state.status.apply(signal) {
        info!(status = %next, "Session status changed");
        emit_status(ui, &next);
    }
}

fn set_media_flag(state: &SharedState, ui: &UiSink, source: TrackSource, active: bool) {
    let flag = match source {
        TrackSource::Microphone => &state.media.mic_on,
        TrackSource::Camera => &state.media.cam_on,
        TrackSource::ScreenShare => &state.media.screen_on,
    };
    if flag.swap(active, Ordering::SeqCst) != active {
        ipc::emit(
            ui,
            UiEvent::MediaState {
                source: source.as_str().to_string(),
                active,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Speaker;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    #[derive(Default)]
    struct FakeRoom {
        calls: Mutex<Vec<String>>,
        fail_mic: AtomicBool,
        fail_sends: AtomicBool,
        mic_gate: Mutex<Option<oneshot::Receiver<()>>>,
        send_gate: Mutex<Option<oneshot::Receiver<()>>>,
        events_tx: Mutex<Option<mpsc::UnboundedSender<RoomEvent>>>,
    }

    impl FakeRoom {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.calls()
                .iter()
                .filter(|c| c.starts_with(prefix))
                .count()
        }

        /// Inject a room event; `false` means the loop is gone.
        fn inject(&self, event: RoomEvent) -> bool {
            match self.events_tx.lock().unwrap().as_ref() {
                Some(tx) => tx.send(event).is_ok(),
                None => false,
            }
        }
    }

    impl MediaTransport for FakeRoom {
        async fn connect(&self, url: &str, _token: &str) -> Result<(), ConnectError> {
            self.record(format!("connect:{url}"));
            Ok(())
        }

        async fn disconnect(&self) {
            self.record("disconnect");
        }

        async fn set_microphone_enabled(&self, enabled: bool) -> Result<(), MediaError> {
            self.record(format!("mic:{enabled}"));
            let gate = self.mic_gate.lock().unwrap().take();
            if let Some(rx) = gate {
                let _ = rx.await;
            }
            if self.fail_mic.load(Ordering::SeqCst) {
                return Err(MediaError("microphone unavailable".into()));
            }
            Ok(())
        }

        async fn set_camera_enabled(&self, enabled: bool) -> Result<(), MediaError> {
            self.record(format!("camera:{enabled}"));
            Ok(())
        }

        async fn set_screen_share_enabled(&self, enabled: bool) -> Result<(), MediaError> {
            self.record(format!("screen:{enabled}"));
            Ok(())
        }

        async fn send_data(&self, payload: Vec<u8>, reliable: bool) -> Result<(), SendError> {
            self.record(format!(
                "send:{}:{}",
                reliable,
                String::from_utf8_lossy(&payload)
            ));
            let gate = self.send_gate.lock().unwrap().take();
            if let Some(rx) = gate {
                let _ = rx.await;
            }
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(SendError("link saturated".into()));
            }
            Ok(())
        }

        fn events(&self) -> mpsc::UnboundedReceiver<RoomEvent> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.events_tx.lock().unwrap() = Some(tx);
            rx
        }
    }

    type TestContext = (
        Arc<FakeRoom>,
        Arc<SessionContext<FakeRoom>>,
        mpsc::UnboundedReceiver<UiEvent>,
    );

    fn make_ctx() -> TestContext {
        let room = Arc::new(FakeRoom::default());
        let (sink, rx) = ipc::channel();
        let ctx = Arc::new(SessionContext::new(
            room.clone(),
            ClientConfig::default(),
            sink,
        ));
        (room, ctx, rx)
    }

    async fn online_ctx() -> TestContext {
        let (room, ctx, rx) = make_ctx();
        let cred = SessionCredential {
            token: "jwt".into(),
            transport_url: "wss://rt.test".into(),
        };
        ctx.establish(&cred).await.unwrap();
        (room, ctx, rx)
    }

    /// Let spawned tasks run.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<UiEvent>) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn whitespace_send_is_a_quiet_no_op() {
        let (room, ctx, _rx) = online_ctx().await;
        ctx.dispatch(Action::SendFreeText("   ".into())).await.unwrap();
        assert_eq!(room.count("send:"), 0);
        assert!(ctx.messages().is_empty());
    }

    #[tokio::test]
    async fn sent_text_lands_in_the_transcript() {
        let (room, ctx, mut rx) = online_ctx().await;
        ctx.dispatch(Action::SendFreeText("hello there".into()))
            .await
            .unwrap();

        assert_eq!(room.count("send:true:"), 1);
        assert!(room.calls().iter().any(|c| c.contains(r#"{"message":"hello there"}"#)));

        let messages = ctx.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert!(!messages[0].failed);

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, UiEvent::Chat { message } if message.text == "hello there")));
    }

    #[tokio::test]
    async fn failed_send_is_marked_not_retracted() {
        let (room, ctx, mut rx) = online_ctx().await;
        room.fail_sends.store(true, Ordering::SeqCst);
        drain(&mut rx);

        let err = ctx
            .dispatch(Action::SendFreeText("lost packet".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Send(_)));

        let messages = ctx.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].failed);

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, UiEvent::Toast { .. })));
    }

    #[tokio::test]
    async fn named_command_sends_without_chat_entry() {
        let (room, ctx, mut rx) = online_ctx().await;
        ctx.dispatch(Action::RunNamedCommand("Open Calculator".into()))
            .await
            .unwrap();

        assert!(room
            .calls()
            .iter()
            .any(|c| c.contains("Execute system command: Open Calculator")));
        assert!(ctx.messages().is_empty());

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, UiEvent::Toast { message } if message == "Sent: Open Calculator")));
    }

    #[tokio::test]
    async fn dispatch_without_session_is_rejected() {
        let (room, ctx, _rx) = make_ctx();
        let err = ctx
            .dispatch(Action::SendFreeText("hi".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotConnected));
        assert_eq!(room.count("send:"), 0);
    }

    #[tokio::test]
    async fn rapid_mic_toggles_issue_one_engine_call() {
        let (room, ctx, _rx) = online_ctx().await;

        let (gate_tx, gate_rx) = oneshot::channel();
        *room.mic_gate.lock().unwrap() = Some(gate_rx);

        let first = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.dispatch(Action::ToggleMic).await })
        };
        // Wait until the first toggle is in flight at the engine.
        while room.count("mic:false") == 0 {
            tokio::task::yield_now().await;
        }

        // Second toggle while the first is pending: coalesced, no call.
        ctx.dispatch(Action::ToggleMic).await.unwrap();

        let _ = gate_tx.send(());
        first.await.unwrap().unwrap();

        assert_eq!(room.count("mic:false"), 1);
        assert!(!ctx.microphone_on());
    }

    #[tokio::test]
    async fn failed_toggle_leaves_state_unchanged() {
        let (room, ctx, mut rx) = online_ctx().await;
        assert!(ctx.microphone_on());
        room.fail_mic.store(true, Ordering::SeqCst);
        drain(&mut rx);

        let err = ctx.dispatch(Action::ToggleMic).await.unwrap_err();
        assert!(matches!(err, DispatchError::Media(_)));
        assert!(ctx.microphone_on(), "failed toggle must not flip the flag");

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, UiEvent::Toast { message } if message.contains("failed"))));
    }

    #[tokio::test]
    async fn inbound_chat_routes_to_transcript() {
        let (room, ctx, _rx) = online_ctx().await;
        assert!(room.inject(RoomEvent::DataReceived {
            payload: br#"{"type": "agent_chat", "text": "at your service"}"#.to_vec(),
        }));
        settle().await;

        let messages = ctx.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].text, "at your service");
    }

    #[tokio::test]
    async fn system_lines_keep_only_the_latest() {
        let (room, ctx, mut rx) = online_ctx().await;
        assert!(room.inject(RoomEvent::DataReceived {
            payload: br#"{"type": "status", "text": "Opening Notepad"}"#.to_vec(),
        }));
        assert!(room.inject(RoomEvent::DataReceived {
            payload: br#"{"type": "status", "text": "Closing Notepad"}"#.to_vec(),
        }));
        settle().await;

        assert_eq!(ctx.last_system_log().as_deref(), Some("Closing Notepad"));
        assert!(ctx.messages().is_empty());

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, UiEvent::SystemLog { text } if text == "Opening Notepad")));
    }

    #[tokio::test]
    async fn camera_toggle_flips_on_then_off() {
        let (room, ctx, _rx) = online_ctx().await;
        assert!(!ctx.camera_on());

        ctx.dispatch(Action::ToggleCamera).await.unwrap();
        assert!(ctx.camera_on());

        ctx.dispatch(Action::ToggleCamera).await.unwrap();
        assert!(!ctx.camera_on());

        assert_eq!(room.count("camera:true"), 1);
        assert_eq!(room.count("camera:false"), 1);
    }

    #[tokio::test]
    async fn malformed_inbound_payloads_are_dropped() {
        let (room, ctx, _rx) = online_ctx().await;
        assert!(room.inject(RoomEvent::DataReceived {
            payload: b"\xff\xfenot even close".to_vec(),
        }));
        settle().await;
        assert!(ctx.messages().is_empty());
        assert_eq!(ctx.status(), SessionStatus::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn caption_clears_itself_after_the_window() {
        let (room, ctx, _rx) = online_ctx().await;
        assert!(room.inject(RoomEvent::DataReceived {
            payload: br#"{"type": "transcription", "text": "first words"}"#.to_vec(),
        }));
        settle().await;
        assert_eq!(ctx.caption().as_deref(), Some("first words"));

        // A newer caption rearms the window.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(room.inject(RoomEvent::DataReceived {
            payload: br#"{"type": "transcription", "text": "more words"}"#.to_vec(),
        }));
        settle().await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(ctx.caption().as_deref(), Some("more words"));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(ctx.caption(), None);
    }

    #[tokio::test]
    async fn speaker_events_drive_activity() {
        let (room, ctx, _rx) = online_ctx().await;

        assert!(room.inject(RoomEvent::ActiveSpeakersChanged {
            speakers: vec![Speaker {
                identity: "agent".into(),
                is_local: false,
            }],
        }));
        settle().await;
        assert_eq!(ctx.activity(), ActivityState::Speaking);

        assert!(room.inject(RoomEvent::ActiveSpeakersChanged {
            speakers: vec![Speaker {
                identity: "user-frontend".into(),
                is_local: true,
            }],
        }));
        settle().await;
        assert_eq!(ctx.activity(), ActivityState::Idle);
    }

    #[tokio::test]
    async fn explicit_agent_state_wins_over_fallback() {
        let (room, ctx, _rx) = online_ctx().await;
        assert!(room.inject(RoomEvent::AgentStateChanged {
            state: ActivityState::Thinking,
        }));
        settle().await;
        assert_eq!(ctx.activity(), ActivityState::Thinking);

        // Speaker silence does not knock an explicit state back to idle.
        assert!(room.inject(RoomEvent::ActiveSpeakersChanged { speakers: vec![] }));
        settle().await;
        assert_eq!(ctx.activity(), ActivityState::Thinking);
    }

    #[tokio::test]
    async fn disconnect_while_reconnecting_goes_offline() {
        let (room, ctx, _rx) = online_ctx().await;

        assert!(room.inject(RoomEvent::Reconnecting));
        settle().await;
        assert_eq!(ctx.status(), SessionStatus::Reconnecting);
        assert!(ctx.status().can_send());

        assert!(room.inject(RoomEvent::Disconnected {
            reason: "server closed".into(),
        }));
        settle().await;
        assert_eq!(ctx.status(), SessionStatus::Offline);
        assert_eq!(ctx.activity(), ActivityState::Idle);
    }

    #[tokio::test]
    async fn reconnected_restores_online() {
        let (room, ctx, _rx) = online_ctx().await;
        assert!(room.inject(RoomEvent::Reconnecting));
        assert!(room.inject(RoomEvent::Reconnected));
        settle().await;
        assert_eq!(ctx.status(), SessionStatus::Online);
    }

    #[tokio::test]
    async fn teardown_unsubscribes_and_clears_state() {
        let (room, ctx, _rx) = online_ctx().await;
        assert!(room.inject(RoomEvent::DataReceived {
            payload: br#"{"message": "remember me"}"#.to_vec(),
        }));
        settle().await;
        assert_eq!(ctx.messages().len(), 1);

        ctx.disconnect().await;
        settle().await;

        assert!(room.calls().iter().any(|c| c == "disconnect"));
        assert_eq!(ctx.status(), SessionStatus::Uninitialized);
        assert!(ctx.messages().is_empty());
        assert_eq!(ctx.caption(), None);
        assert_eq!(ctx.activity(), ActivityState::Idle);
        // The room loop is gone; nothing is listening anymore.
        assert!(!room.inject(RoomEvent::Reconnecting));
    }

    #[tokio::test]
    async fn stale_send_completion_is_discarded() {
        let (room, ctx, mut rx) = online_ctx().await;

        let (gate_tx, gate_rx) = oneshot::channel();
        *room.send_gate.lock().unwrap() = Some(gate_rx);
        room.fail_sends.store(true, Ordering::SeqCst);

        let inflight = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.dispatch(Action::SendFreeText("too late".into())).await })
        };
        while room.count("send:") == 0 {
            tokio::task::yield_now().await;
        }

        // Session torn down while the send is still in flight.
        ctx.disconnect().await;
        drain(&mut rx);

        let _ = gate_tx.send(());
        // The failing completion belongs to a dead epoch: no error, no
        // chat entry, no toast.
        inflight.await.unwrap().unwrap();
        assert!(ctx.messages().is_empty());
        let events = drain(&mut rx);
        assert!(!events.iter().any(|e| matches!(e, UiEvent::Toast { .. })));
    }

    /// Serve a single canned HTTP response on a loopback listener.
    async fn serve_once(response: String) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let _ = sock.write_all(response.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn warming_backend_leaves_status_uninitialized_and_retry_succeeds() {
        let (room, ctx, _rx) = make_ctx();

        let warming = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                .to_string(),
        )
        .await;
        let err = ctx.connect(Some(&warming)).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Credential(CredentialError::WarmingUp)
        ));
        assert_eq!(ctx.status(), SessionStatus::Uninitialized);
        assert_eq!(room.count("connect:"), 0);

        let body = r#"{"token": "jwt", "url": "wss://rt.test"}"#;
        let ready = serve_once(format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        ))
        .await;
        ctx.connect(Some(&ready)).await.unwrap();
        assert_eq!(ctx.status(), SessionStatus::Online);
        assert_eq!(room.count("connect:wss://rt.test"), 1);
    }
}
