//! Shared fixtures for app integration tests.

// Each test binary compiles this module separately and uses a subset.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use glyphline_capture::{
    AcquireError, FrameSource, SourceProvider, SourceRequest, SyntheticFrameSource,
};
use glyphline_codec::{Envelope, Payload, encode};
use glyphline_core::{CaptureSettings, EntryId, ImageFormat, SettingsPatch};
use glyphline_session::{CardSink, SessionController, SettingsStore, TransportConnector};
use glyphline_transport::{MemorySocketHandle, TransportError, WireSocket, memory_socket_pair};

/// Poll bound for one pump call in tests.
#[allow(dead_code)]
pub const PUMP: Duration = Duration::from_millis(1);

/// What the scripted provider does on the next acquisition.
#[derive(Debug, Clone, Copy)]
pub enum ProviderScript {
    /// Grant a synthetic source with the given geometry.
    Grant {
        /// Source frame width.
        width: u32,
        /// Source frame height.
        height: u32,
    },
    /// Fail with `PermissionDenied`.
    Deny,
    /// Fail with `NoSourceAvailable`.
    NoSource,
}

#[derive(Debug)]
struct ProviderState {
    script: Mutex<ProviderScript>,
    acquisitions: Mutex<usize>,
    last_source: Mutex<Option<Arc<SyntheticFrameSource>>>,
}

/// Scripted capture-permission provider.
#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    state: Arc<ProviderState>,
}

#[allow(dead_code)]
impl ScriptedProvider {
    pub fn granting(width: u32, height: u32) -> Self {
        Self::with_script(ProviderScript::Grant { width, height })
    }

    pub fn with_script(script: ProviderScript) -> Self {
        Self {
            state: Arc::new(ProviderState {
                script: Mutex::new(script),
                acquisitions: Mutex::new(0),
                last_source: Mutex::new(None),
            }),
        }
    }

    pub fn set_script(&self, script: ProviderScript) {
        *self.state.script.lock().unwrap() = script;
    }

    pub fn acquisitions(&self) -> usize {
        *self.state.acquisitions.lock().unwrap()
    }

    pub fn last_source(&self) -> Option<Arc<SyntheticFrameSource>> {
        self.state.last_source.lock().unwrap().clone()
    }
}

impl SourceProvider for ScriptedProvider {
    fn acquire(&self, _request: &SourceRequest) -> Result<Arc<dyn FrameSource>, AcquireError> {
        *self.state.acquisitions.lock().unwrap() += 1;
        match *self.state.script.lock().unwrap() {
            ProviderScript::Grant { width, height } => {
                let source = Arc::new(SyntheticFrameSource::new(width, height));
                *self.state.last_source.lock().unwrap() = Some(Arc::clone(&source));
                Ok(source)
            }
            ProviderScript::Deny => Err(AcquireError::PermissionDenied),
            ProviderScript::NoSource => Err(AcquireError::NoSourceAvailable),
        }
    }
}

#[derive(Debug, Default)]
struct ConnectorState {
    refuse: bool,
    auto_ack: bool,
    attempts: usize,
    handles: Vec<MemorySocketHandle>,
}

/// Scripted connector over in-memory sockets.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<ConnectorState>>,
}

#[allow(dead_code)]
impl MemoryConnector {
    /// Connector whose peer acks every handshake immediately.
    pub fn acking() -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectorState {
                auto_ack: true,
                ..ConnectorState::default()
            })),
        }
    }

    /// Connector whose peer stays silent during the handshake.
    pub fn silent() -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectorState::default())),
        }
    }

    /// Connector that refuses every dial.
    pub fn refusing() -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectorState {
                refuse: true,
                ..ConnectorState::default()
            })),
        }
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    pub fn latest_handle(&self) -> Option<MemorySocketHandle> {
        self.state.lock().unwrap().handles.last().cloned()
    }
}

impl TransportConnector for MemoryConnector {
    fn connect(&self, _endpoint: &str) -> Result<Box<dyn WireSocket>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        if state.refuse {
            return Err(TransportError::ConnectionRefused(
                "scripted refusal".to_string(),
            ));
        }

        let (socket, handle) = memory_socket_pair();
        if state.auto_ack {
            handle.push_inbound(envelope_frame(Payload::Init));
        }
        state.handles.push(handle);
        Ok(Box::new(socket))
    }
}

#[derive(Debug, Default)]
struct StoreState {
    stored: Option<SettingsPatch>,
    saves: Vec<CaptureSettings>,
}

/// Settings store recording every save.
#[derive(Debug, Clone, Default)]
pub struct RecordingStore {
    state: Arc<Mutex<StoreState>>,
}

#[allow(dead_code)]
impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn preloaded(patch: SettingsPatch) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().stored = Some(patch);
        store
    }

    pub fn saves(&self) -> Vec<CaptureSettings> {
        self.state.lock().unwrap().saves.clone()
    }
}

impl SettingsStore for RecordingStore {
    fn load(&self) -> Option<SettingsPatch> {
        self.state.lock().unwrap().stored.clone()
    }

    fn save(&self, settings: &CaptureSettings) {
        self.state.lock().unwrap().saves.push(settings.clone());
    }
}

/// One recorded card-sink call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardEvent {
    /// `push_image` with the entry id, format, and byte length.
    Image(EntryId, ImageFormat, usize),
    /// `push_audio` with the entry id, mime, and byte length.
    Audio(EntryId, String, usize),
}

/// Card sink recording every call.
#[derive(Debug, Clone, Default)]
pub struct RecordingCardSink {
    events: Arc<Mutex<Vec<CardEvent>>>,
}

#[allow(dead_code)]
impl RecordingCardSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CardEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl CardSink for RecordingCardSink {
    fn push_image(&self, entry: EntryId, format: ImageFormat, image: &[u8]) {
        self.events
            .lock()
            .unwrap()
            .push(CardEvent::Image(entry, format, image.len()));
    }

    fn push_audio(&self, entry: EntryId, mime: &str, audio: &[u8]) {
        self.events
            .lock()
            .unwrap()
            .push(CardEvent::Audio(entry, mime.to_string(), audio.len()));
    }
}

/// Encodes one envelope into a wire frame for scripting inbound traffic.
#[allow(dead_code)]
pub fn envelope_frame(payload: Payload<'_>) -> Vec<u8> {
    encode(&Envelope {
        timestamp_ms: 1_000,
        payload,
    })
    .expect("fixture encode should succeed")
}

/// Builds a controller over the scripted fixtures with a short handshake
/// bound.
#[allow(dead_code)]
pub fn controller_with(
    provider: &ScriptedProvider,
    connector: &MemoryConnector,
    store: &RecordingStore,
    cards: Option<Arc<dyn CardSink>>,
) -> SessionController {
    SessionController::new(
        "ws://127.0.0.1:49156",
        Box::new(provider.clone()),
        Box::new(connector.clone()),
        Box::new(store.clone()),
        cards,
    )
    .with_handshake_timeout(Duration::from_millis(40))
}
