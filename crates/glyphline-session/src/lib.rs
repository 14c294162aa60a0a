#![warn(missing_docs)]
//! # glyphline-session
//!
//! ## Purpose
//! Orchestrates the capture session lifecycle: permission, transport
//! handshake, steady-state ingestion, and teardown.
//!
//! ## Responsibilities
//! - Drive the `Idle -> Acquiring -> HandshakeInFlight -> Active | Error`
//!   state machine with user-triggered retry only.
//! - Stitch inbound OCR results and audio clips onto the timeline.
//! - Own the capture settings: merge updates, propagate them, persist them.
//! - Define the persistence seam ([`SettingsStore`]) and the flashcard
//!   seam ([`CardSink`]).
//!
//! ## Data flow
//! `initialize` acquires a frame source, binds a capture service, opens the
//! transport; `pump` services inbound frames whose handlers append to the
//! [`TimelineStore`] and feed the optional card sink.
//!
//! ## Ownership and lifetimes
//! The controller is a plain owned instance: every collaborator is injected
//! at construction and tests build their own controller per test. Handler
//! closures share the capture service and timeline through `Arc<Mutex<..>>`
//! so state is read at the point of use, never captured as a snapshot.
//!
//! ## Error model
//! Initialization faults are mapped to [`SessionFault`] values surfaced in
//! [`SessionState::last_error`] with a user-facing message. Steady-state
//! decode/encode failures are logged and dropped; only a closed transport
//! ends the session, and then without timeline data loss.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use glyphline_capture::{
    AcquireError, CaptureService, FrameSource, SourceProvider, SourceRequest,
};
use glyphline_core::{
    AudioClip, CaptureSettings, CoreError, EncodedImage, EntryId, ImageFormat, SessionFault,
    SessionPhase, SessionState, SettingsPatch, TimelineStore,
};
use glyphline_transport::{
    MessageHandlers, ScreenshotSource, TransportError, TransportSession, TungsteniteSocket,
    WireSocket, DEFAULT_HANDSHAKE_TIMEOUT,
};
use log::{debug, info, warn};

/// Seam over dialing the remote service endpoint.
pub trait TransportConnector: Send {
    /// Dials the endpoint and returns an open socket.
    ///
    /// # Errors
    /// Returns [`TransportError::ConnectionRefused`] (or another transport
    /// failure) when the endpoint cannot be reached.
    fn connect(&self, endpoint: &str) -> Result<Box<dyn WireSocket>, TransportError>;
}

/// Production connector dialing a websocket endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl TransportConnector for WebSocketConnector {
    fn connect(&self, endpoint: &str) -> Result<Box<dyn WireSocket>, TransportError> {
        Ok(Box::new(TungsteniteSocket::dial(endpoint)?))
    }
}

/// Seam over best-effort preference persistence.
///
/// Failures on either side are logged by implementations and never surface
/// to the session.
pub trait SettingsStore: Send {
    /// Loads previously saved settings as a partial patch, when present.
    fn load(&self) -> Option<SettingsPatch>;

    /// Saves the current settings. Best-effort.
    fn save(&self, settings: &CaptureSettings);
}

/// JSON-file settings store.
#[derive(Debug, Clone)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
}

impl JsonFileSettingsStore {
    /// Creates a store persisting to the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsStore for JsonFileSettingsStore {
    fn load(&self) -> Option<SettingsPatch> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) => {
                debug!(
                    "no stored settings at {}: {error}",
                    self.path.display()
                );
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(patch) => Some(patch),
            Err(error) => {
                warn!(
                    "ignoring unreadable settings file {}: {error}",
                    self.path.display()
                );
                None
            }
        }
    }

    fn save(&self, settings: &CaptureSettings) {
        let serialized = match serde_json::to_string_pretty(settings) {
            Ok(serialized) => serialized,
            Err(error) => {
                warn!("settings serialization failed: {error}");
                return;
            }
        };

        if let Err(error) = fs::write(&self.path, serialized) {
            warn!(
                "settings save to {} failed: {error}",
                self.path.display()
            );
        }
    }
}

/// Seam to the local flashcard-update integration.
///
/// The core hands over only an entry id and a buffer; implementations own
/// the protocol and swallow their own failures.
pub trait CardSink: Send + Sync {
    /// Forwards an entry's screenshot.
    fn push_image(&self, entry: EntryId, format: ImageFormat, image: &[u8]);

    /// Forwards an entry's audio clip.
    fn push_audio(&self, entry: EntryId, mime: &str, audio: &[u8]);
}

/// Screenshot source answering remote requests from the shared capture
/// service, always full-frame.
struct SharedCaptureSource {
    capture: Arc<Mutex<CaptureService>>,
}

impl ScreenshotSource for SharedCaptureSource {
    fn capture_screenshot(&mut self) -> Option<EncodedImage> {
        self.capture.lock().ok()?.capture_frame(false)
    }
}

/// The session controller: single source of truth for session state.
pub struct SessionController {
    endpoint: String,
    source_provider: Box<dyn SourceProvider>,
    connector: Box<dyn TransportConnector>,
    settings_store: Box<dyn SettingsStore>,
    card_sink: Option<Arc<dyn CardSink>>,
    handshake_timeout: Duration,
    settings: CaptureSettings,
    source: Option<Arc<dyn FrameSource>>,
    capture: Option<Arc<Mutex<CaptureService>>>,
    transport: Option<TransportSession>,
    timeline: Arc<Mutex<TimelineStore>>,
    state: SessionState,
}

impl SessionController {
    /// Creates an idle controller.
    ///
    /// Stored settings are loaded once here and merged over the defaults;
    /// an invalid stored patch is discarded.
    pub fn new(
        endpoint: impl Into<String>,
        source_provider: Box<dyn SourceProvider>,
        connector: Box<dyn TransportConnector>,
        settings_store: Box<dyn SettingsStore>,
        card_sink: Option<Arc<dyn CardSink>>,
    ) -> Self {
        let mut settings = CaptureSettings::default();
        if let Some(patch) = settings_store.load() {
            let mut merged = settings.clone();
            merged.apply(&patch);
            match merged.validate() {
                Ok(()) => settings = merged,
                Err(error) => warn!("discarding invalid stored settings: {error}"),
            }
        }

        Self {
            endpoint: endpoint.into(),
            source_provider,
            connector,
            settings_store,
            card_sink,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            settings,
            source: None,
            capture: None,
            transport: None,
            timeline: Arc::new(Mutex::new(TimelineStore::new())),
            state: SessionState::new(),
        }
    }

    /// Overrides the handshake bound; mainly for tests.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Returns the current session state snapshot.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Returns the settings applied to the next capture.
    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Returns the shared timeline handle.
    pub fn timeline_handle(&self) -> Arc<Mutex<TimelineStore>> {
        Arc::clone(&self.timeline)
    }

    /// Runs one initialization attempt.
    ///
    /// Legal only from `Idle` or `Error`; a second call while an attempt is
    /// in flight or the session is active is ignored with a warning. The
    /// outcome lands in [`SessionController::state`]: `Active` on success,
    /// `Error` with a mapped [`SessionFault`] otherwise. A transport
    /// failure releases the already-acquired stream before surfacing.
    pub fn initialize(&mut self) {
        if !matches!(self.state.phase, SessionPhase::Idle | SessionPhase::Error) {
            warn!("initialize ignored: an attempt is already in flight or the session is active");
            return;
        }

        self.state.phase = SessionPhase::Acquiring;
        self.state.last_error = None;

        let request = SourceRequest {
            frame_rate_hint: self.settings.frame_rate_hint,
        };
        let source = match self.source_provider.acquire(&request) {
            Ok(source) => source,
            Err(error) => {
                self.fail_initialization(acquire_fault(error));
                return;
            }
        };

        let mut service = CaptureService::new(self.settings.clone());
        service.set_source(Arc::clone(&source));
        let capture = Arc::new(Mutex::new(service));
        self.source = Some(source);
        self.capture = Some(Arc::clone(&capture));
        self.state.stream_attached = true;

        self.state.phase = SessionPhase::HandshakeInFlight;
        let socket = match self.connector.connect(&self.endpoint) {
            Ok(socket) => socket,
            Err(error) => {
                self.release_stream();
                self.fail_initialization(transport_fault(&error));
                return;
            }
        };

        let screenshots = Box::new(SharedCaptureSource {
            capture: Arc::clone(&capture),
        });
        let mut transport =
            match TransportSession::connect_with_timeout(socket, screenshots, self.handshake_timeout)
            {
                Ok(transport) => transport,
                Err(error) => {
                    self.release_stream();
                    self.fail_initialization(transport_fault(&error));
                    return;
                }
            };

        transport.set_message_handler(self.build_handlers(capture));
        self.transport = Some(transport);
        self.state.transport_connected = true;
        self.state.phase = SessionPhase::Active;
        info!("session active against {}", self.endpoint);
    }

    /// Services inbound traffic while active.
    ///
    /// Waits at most `timeout` for one frame. A closed transport moves the
    /// session to `Error` with [`SessionFault::TransportClosed`]; timeline
    /// entries are retained.
    pub fn pump(&mut self, timeout: Duration) {
        if self.state.phase != SessionPhase::Active {
            return;
        }
        let Some(transport) = self.transport.as_mut() else {
            return;
        };

        match transport.poll_inbound(timeout) {
            Ok(_) => {}
            Err(TransportError::Closed) => {
                warn!("transport closed while active");
                if let Some(mut transport) = self.transport.take() {
                    transport.disconnect();
                }
                self.release_stream();
                self.state.transport_connected = false;
                self.state.phase = SessionPhase::Error;
                self.state.last_error = Some(SessionFault::TransportClosed);
            }
            // Non-fatal failures were already routed to the error handler.
            Err(_) => {}
        }
    }

    /// Merges a settings update, propagates it, and persists it.
    ///
    /// Safe to call in any state; before `Active` there is no capture
    /// service to observe the change.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidSettings`] and leaves the current
    /// settings untouched when the merged result violates an invariant.
    pub fn update_capture_settings(&mut self, patch: &SettingsPatch) -> Result<(), CoreError> {
        let mut merged = self.settings.clone();
        merged.apply(patch);
        merged.validate()?;
        self.settings = merged;

        if let Some(capture) = &self.capture
            && let Ok(mut service) = capture.lock()
        {
            service.update_settings(self.settings.clone());
        }

        self.settings_store.save(&self.settings);
        Ok(())
    }

    /// Captures one frame on demand through the session's capture service.
    ///
    /// Shares the service's scratch buffer with inbound-triggered captures;
    /// callers must not overlap this with `pump` on another thread.
    pub fn capture_now(&mut self, use_crop: bool) -> Option<EncodedImage> {
        self.capture.as_ref()?.lock().ok()?.capture_frame(use_crop)
    }

    /// Replaces the recognized text of a timeline entry.
    ///
    /// # Returns
    /// `false` when no entry has that id; the call is a no-op then.
    pub fn edit_entry_text(&mut self, id: EntryId, text: impl Into<String>) -> bool {
        self.timeline
            .lock()
            .map(|mut timeline| timeline.set_entry_text(id, text))
            .unwrap_or(false)
    }

    /// Tears the session down to `Idle`.
    ///
    /// Stops the stream's tracks and disconnects the transport; a partial
    /// teardown still clears controller state. The timeline survives.
    pub fn shutdown(&mut self) {
        if let Some(source) = self.source.take() {
            source.stop();
        }
        if let Some(capture) = self.capture.take()
            && let Ok(mut service) = capture.lock()
        {
            service.clear_source();
        }
        if let Some(mut transport) = self.transport.take() {
            transport.disconnect();
        }
        self.state = SessionState::new();
    }

    fn build_handlers(&self, capture: Arc<Mutex<CaptureService>>) -> MessageHandlers {
        let timeline = Arc::clone(&self.timeline);
        let cards = self.card_sink.clone();
        let audio_timeline = Arc::clone(&self.timeline);
        let audio_cards = self.card_sink.clone();

        MessageHandlers {
            on_ocr_result: Box::new(move |text| {
                let image = capture
                    .lock()
                    .ok()
                    .and_then(|mut service| service.capture_frame(false));
                let image = match image {
                    Some(image) => image,
                    None => {
                        // Entry still gets created so the next audio clip
                        // cannot attach to a neighboring entry.
                        warn!("full-frame capture failed for ocr result; entry has no image");
                        let format = capture
                            .lock()
                            .map(|service| service.settings().format)
                            .unwrap_or(ImageFormat::Jpeg);
                        EncodedImage {
                            format,
                            bytes: Vec::new(),
                        }
                    }
                };

                let Ok(mut timeline) = timeline.lock() else {
                    warn!("timeline lock poisoned; dropping ocr result");
                    return;
                };
                let id = timeline.create_entry(image, text.to_string(), now_ms());
                debug!("timeline entry {} created from ocr result", id.0);

                if let (Some(cards), Some(entry)) = (cards.as_ref(), timeline.entry(id))
                    && !entry.image.is_empty()
                {
                    cards.push_image(id, entry.image_format, &entry.image);
                }
            }),
            on_audio: Box::new(move |bytes, mime| {
                let Ok(mut timeline) = audio_timeline.lock() else {
                    warn!("timeline lock poisoned; dropping audio clip");
                    return;
                };
                // Positional correlation: the clip belongs to the newest
                // entry. The wire schema carries no result id, so two
                // results arriving before their audio would mis-attach.
                let Some(id) = timeline.latest_entry_id() else {
                    debug!("audio clip dropped: no timeline entries yet");
                    return;
                };
                timeline.attach_audio(
                    id,
                    AudioClip {
                        bytes: bytes.to_vec(),
                        mime: mime.to_string(),
                    },
                );

                if let Some(cards) = audio_cards.as_ref() {
                    cards.push_audio(id, mime, bytes);
                }
            }),
            on_error: Box::new(|error| {
                // Malformed frames and failed sends are dropped; the
                // session stays active.
                warn!("transport error while active: {error}");
            }),
        }
    }

    fn release_stream(&mut self) {
        if let Some(source) = self.source.take() {
            source.stop();
        }
        if let Some(capture) = self.capture.take()
            && let Ok(mut service) = capture.lock()
        {
            service.clear_source();
        }
        self.state.stream_attached = false;
    }

    fn fail_initialization(&mut self, fault: SessionFault) {
        warn!("initialization failed: {}", fault.user_message());
        self.state.phase = SessionPhase::Error;
        self.state.last_error = Some(fault);
    }
}

fn acquire_fault(error: AcquireError) -> SessionFault {
    match error {
        AcquireError::PermissionDenied => SessionFault::PermissionDenied,
        AcquireError::NoSourceAvailable => SessionFault::NoSourceAvailable,
    }
}

fn transport_fault(error: &TransportError) -> SessionFault {
    match error {
        TransportError::HandshakeTimeout => SessionFault::HandshakeTimeout,
        _ => SessionFault::ConnectionRefused,
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
