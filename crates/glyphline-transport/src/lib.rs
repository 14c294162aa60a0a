#![warn(missing_docs)]
//! # glyphline-transport
//!
//! ## Purpose
//! Owns the one persistent bidirectional binary channel to the remote OCR
//! service and the handshake/dispatch logic around it.
//!
//! ## Responsibilities
//! - Define the socket seam ([`WireSocket`]) with a real websocket client
//!   and a scripted in-memory implementation for tests.
//! - Announce protocol readiness with exactly one `Init` envelope per
//!   connection and bound the acknowledgement wait.
//! - Decode inbound frames in delivery order and route them to the
//!   registered handler set.
//! - Serve remote screenshot requests within the same dispatch turn.
//!
//! ## Data flow
//! Inbound binary frame -> codec decode -> handler callback or screenshot
//! reply. Outbound: typed send surface -> codec encode -> socket.
//!
//! ## Ownership and lifetimes
//! The session owns its socket and handler set; decoded payloads live only
//! for the dispatch turn, so handler callbacks receive borrowed fields.
//!
//! ## Error model
//! Connection attempts fail loud with [`TransportError`] and are terminal
//! (callers retry from scratch; no partial-resume state is kept). After the
//! handshake, malformed frames and send failures are reported through the
//! `on_error` handler and dropped; only a closed channel ends dispatch.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use glyphline_codec::{CodecError, Envelope, Payload, ScreenshotReply, decode, encode};
use glyphline_core::{EncodedImage, ImageFormat};
use log::{debug, warn};
use thiserror::Error;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message as WsMessage, WebSocket};
use url::Url;

/// Default bound on the wait for the handshake acknowledgement.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Image-slot label carried by every screenshot response.
pub const SCREENSHOT_KEY: &str = "screenshot";

/// Seam over one binary message channel.
pub trait WireSocket: Send {
    /// Sends one binary frame.
    ///
    /// # Errors
    /// Returns [`TransportError::Closed`] on a closed channel or an I/O
    /// variant on socket failure.
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Receives one binary frame, waiting at most `timeout`.
    ///
    /// # Returns
    /// `Ok(None)` when no binary frame arrived within the bound (non-binary
    /// frames are ignored per the channel contract).
    ///
    /// # Errors
    /// Returns [`TransportError::Closed`] once the peer has closed.
    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    /// Closes the channel. Idempotent.
    fn close(&mut self);

    /// Returns transport-level open state, independent of the handshake.
    fn is_open(&self) -> bool;
}

/// Validates that an endpoint is a `ws`/`wss` URL.
///
/// # Errors
/// Returns [`TransportError::InvalidEndpoint`] for unparsable URLs or other
/// schemes.
pub fn validate_service_endpoint(endpoint: &str) -> Result<(), TransportError> {
    let parsed = Url::parse(endpoint)
        .map_err(|error| TransportError::InvalidEndpoint(format!("invalid url: {error}")))?;

    if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
        return Err(TransportError::InvalidEndpoint(
            "service endpoint must use ws or wss".to_string(),
        ));
    }

    Ok(())
}

/// Blocking websocket client socket.
pub struct TungsteniteSocket {
    inner: WebSocket<MaybeTlsStream<TcpStream>>,
}

impl TungsteniteSocket {
    /// Dials the service endpoint.
    ///
    /// # Errors
    /// Returns [`TransportError::InvalidEndpoint`] for a malformed URL and
    /// [`TransportError::ConnectionRefused`] when the endpoint is not
    /// reachable.
    pub fn dial(endpoint: &str) -> Result<Self, TransportError> {
        validate_service_endpoint(endpoint)?;
        let (inner, _response) = tungstenite::connect(endpoint)
            .map_err(|error| TransportError::ConnectionRefused(error.to_string()))?;
        Ok(Self { inner })
    }

    fn set_read_timeout(&mut self, timeout: Duration) {
        if let MaybeTlsStream::Plain(stream) = self.inner.get_mut() {
            let _ = stream.set_read_timeout(Some(timeout));
        }
    }
}

impl WireSocket for TungsteniteSocket {
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.inner
            .send(WsMessage::Binary(frame.to_vec()))
            .map_err(classify_tungstenite_error)
    }

    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        self.set_read_timeout(timeout.max(Duration::from_millis(1)));
        match self.inner.read() {
            Ok(WsMessage::Binary(frame)) => Ok(Some(frame)),
            Ok(WsMessage::Close(_)) => Err(TransportError::Closed),
            // Text, ping, pong: not part of the binary channel contract.
            Ok(_) => Ok(None),
            Err(tungstenite::Error::Io(error))
                if matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(None)
            }
            Err(error) => Err(classify_tungstenite_error(error)),
        }
    }

    fn close(&mut self) {
        let _ = self.inner.close(None);
    }

    fn is_open(&self) -> bool {
        self.inner.can_write()
    }
}

fn classify_tungstenite_error(error: tungstenite::Error) -> TransportError {
    match error {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        tungstenite::Error::Io(io_error)
            if matches!(
                io_error.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::NotConnected
            ) =>
        {
            TransportError::Closed
        }
        other => TransportError::Io(other.to_string()),
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    inbound: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    open: bool,
    fail_sends: bool,
}

/// Scripted in-memory socket for deterministic tests.
///
/// Created via [`memory_socket_pair`]; the paired handle feeds inbound
/// frames and observes outbound ones.
#[derive(Debug)]
pub struct MemoryWireSocket {
    state: Arc<Mutex<MemoryState>>,
}

/// Test-side handle of a [`MemoryWireSocket`].
#[derive(Debug, Clone)]
pub struct MemorySocketHandle {
    state: Arc<Mutex<MemoryState>>,
}

/// Creates a connected in-memory socket plus its scripting handle.
pub fn memory_socket_pair() -> (MemoryWireSocket, MemorySocketHandle) {
    let state = Arc::new(Mutex::new(MemoryState {
        open: true,
        ..MemoryState::default()
    }));
    (
        MemoryWireSocket {
            state: Arc::clone(&state),
        },
        MemorySocketHandle { state },
    )
}

impl MemorySocketHandle {
    /// Queues one inbound frame for the socket to receive.
    pub fn push_inbound(&self, frame: Vec<u8>) {
        if let Ok(mut state) = self.state.lock() {
            state.inbound.push_back(frame);
        }
    }

    /// Returns a copy of every frame sent so far, in send order.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .map(|state| state.sent.clone())
            .unwrap_or_default()
    }

    /// Simulates the peer closing the channel.
    pub fn close_remote(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.open = false;
        }
    }

    /// Makes subsequent sends fail without closing the channel.
    pub fn set_fail_sends(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_sends = fail;
        }
    }

    /// Returns the socket's open state.
    pub fn is_open(&self) -> bool {
        self.state.lock().map(|state| state.open).unwrap_or(false)
    }
}

impl WireSocket for MemoryWireSocket {
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock().map_err(|_| TransportError::Closed)?;
        if !state.open {
            return Err(TransportError::Closed);
        }
        if state.fail_sends {
            return Err(TransportError::Io("scripted send failure".to_string()));
        }
        state.sent.push(frame.to_vec());
        Ok(())
    }

    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        {
            let mut state = self.state.lock().map_err(|_| TransportError::Closed)?;
            if let Some(frame) = state.inbound.pop_front() {
                return Ok(Some(frame));
            }
            if !state.open {
                return Err(TransportError::Closed);
            }
        }
        // Nothing queued; pace the caller's poll loop instead of spinning.
        std::thread::sleep(timeout.min(Duration::from_millis(5)));
        Ok(None)
    }

    fn close(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.open = false;
        }
    }

    fn is_open(&self) -> bool {
        self.state.lock().map(|state| state.open).unwrap_or(false)
    }
}

/// Handler set invoked by inbound dispatch; at most one set is active.
pub struct MessageHandlers {
    /// Invoked with recognized text from an `OcrResult` envelope.
    pub on_ocr_result: Box<dyn FnMut(&str) + Send>,
    /// Invoked with clip bytes and MIME type from an `Audio` envelope.
    pub on_audio: Box<dyn FnMut(&[u8], &str) + Send>,
    /// Invoked for malformed frames and failed sends.
    pub on_error: Box<dyn FnMut(&TransportError) + Send>,
}

impl Default for MessageHandlers {
    fn default() -> Self {
        Self {
            on_ocr_result: Box::new(|_| {}),
            on_audio: Box::new(|_, _| {}),
            on_error: Box::new(|error| warn!("unhandled transport error: {error}")),
        }
    }
}

/// Supplies full-frame screenshots for remote requests.
pub trait ScreenshotSource: Send {
    /// Captures the full, uncropped current frame; `None` on soft failure.
    fn capture_screenshot(&mut self) -> Option<EncodedImage>;
}

/// Outcome of servicing one inbound poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundActivity {
    /// No frame arrived within the poll bound.
    Idle,
    /// One frame was decoded and dispatched.
    Handled,
    /// One frame was dropped as malformed.
    Dropped,
}

/// One live session over a wire socket.
pub struct TransportSession {
    socket: Option<Box<dyn WireSocket>>,
    handlers: MessageHandlers,
    screenshots: Box<dyn ScreenshotSource>,
    // First inbound envelope when it arrived as the handshake ack but was
    // not an Init; served on the next dispatch turn.
    pending: Option<Vec<u8>>,
}

impl TransportSession {
    /// Opens a session over an already-dialed socket with the default 5 s
    /// handshake bound. See [`TransportSession::connect_with_timeout`].
    ///
    /// # Errors
    /// Propagates the handshake failure modes of
    /// [`TransportSession::connect_with_timeout`].
    pub fn connect(
        socket: Box<dyn WireSocket>,
        screenshots: Box<dyn ScreenshotSource>,
    ) -> Result<Self, TransportError> {
        Self::connect_with_timeout(socket, screenshots, DEFAULT_HANDSHAKE_TIMEOUT)
    }

    /// Opens a session: sends exactly one `Init` envelope, then waits for
    /// the acknowledgement-equivalent first inbound envelope.
    ///
    /// A failed attempt is terminal; callers retry from scratch with a new
    /// socket. A non-`Init` first envelope completes the handshake and is
    /// held for the first dispatch turn.
    ///
    /// # Errors
    /// Returns [`TransportError::HandshakeTimeout`] when no inbound
    /// activity occurs within `handshake_timeout`, or the socket failure
    /// that interrupted the wait.
    pub fn connect_with_timeout(
        mut socket: Box<dyn WireSocket>,
        screenshots: Box<dyn ScreenshotSource>,
        handshake_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let init = encode(&Envelope {
            timestamp_ms: now_ms(),
            payload: Payload::Init,
        })
        .map_err(TransportError::Malformed)?;
        socket.send_frame(&init)?;

        let deadline = Instant::now() + handshake_timeout;
        let pending = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                socket.close();
                return Err(TransportError::HandshakeTimeout);
            }

            match socket.recv_frame(remaining.min(Duration::from_millis(250))) {
                Ok(Some(frame)) => match decode(&frame) {
                    Ok(envelope) if matches!(envelope.payload, Payload::Init) => break None,
                    Ok(_) => break Some(frame),
                    Err(error) => {
                        // Any inbound activity completes the handshake; a
                        // garbled ack is dropped like any malformed frame.
                        warn!("dropping malformed handshake frame: {error}");
                        break None;
                    }
                },
                Ok(None) => continue,
                Err(error) => {
                    socket.close();
                    return Err(error);
                }
            }
        };

        Ok(Self {
            socket: Some(socket),
            handlers: MessageHandlers::default(),
            screenshots,
            pending,
        })
    }

    /// Replaces the active handler set.
    pub fn set_message_handler(&mut self, handlers: MessageHandlers) {
        self.handlers = handlers;
    }

    /// Services at most one inbound frame, waiting up to `timeout`.
    ///
    /// Malformed frames are reported to `on_error` and dropped; the session
    /// stays usable.
    ///
    /// # Errors
    /// Returns [`TransportError::Closed`] once the channel is gone; the
    /// socket is released and subsequent sends become no-ops.
    pub fn poll_inbound(&mut self, timeout: Duration) -> Result<InboundActivity, TransportError> {
        let frame = match self.pending.take() {
            Some(frame) => frame,
            None => {
                let Some(socket) = self.socket.as_mut() else {
                    return Err(TransportError::Closed);
                };
                match socket.recv_frame(timeout) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => return Ok(InboundActivity::Idle),
                    Err(TransportError::Closed) => {
                        self.socket = None;
                        return Err(TransportError::Closed);
                    }
                    Err(error) => {
                        (self.handlers.on_error)(&error);
                        return Ok(InboundActivity::Idle);
                    }
                }
            }
        };

        Ok(self.dispatch(&frame))
    }

    fn dispatch(&mut self, frame: &[u8]) -> InboundActivity {
        let envelope = match decode(frame) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!("dropping malformed inbound frame: {error}");
                let error = TransportError::Malformed(error);
                (self.handlers.on_error)(&error);
                return InboundActivity::Dropped;
            }
        };

        match envelope.payload {
            Payload::Init => {
                debug!("ignoring init envelope after handshake");
            }
            Payload::RequestScreenshot => {
                // Serves the remote peer; reply within this dispatch turn.
                match self.screenshots.capture_screenshot() {
                    Some(image) => self.send_screenshot_response(image.format, &image.bytes),
                    None => debug!("screenshot request skipped: capture failed soft"),
                }
            }
            Payload::ResponseScreenshot(_) => {
                debug!("ignoring unexpected screenshot response from peer");
            }
            Payload::OcrResult(result) => (self.handlers.on_ocr_result)(result.text),
            Payload::Audio(clip) => (self.handlers.on_audio)(clip.audio, clip.mime),
        }
        InboundActivity::Handled
    }

    /// Sends one screenshot response. Fire-and-forget: failures go to
    /// `on_error`, a disconnected session no-ops.
    pub fn send_screenshot_response(&mut self, format: ImageFormat, image: &[u8]) {
        self.send_envelope(Envelope {
            timestamp_ms: now_ms(),
            payload: Payload::ResponseScreenshot(ScreenshotReply {
                key: SCREENSHOT_KEY,
                format,
                image,
            }),
        });
    }

    fn send_envelope(&mut self, envelope: Envelope<'_>) {
        let Some(socket) = self.socket.as_mut() else {
            debug!("send skipped: transport disconnected");
            return;
        };

        let frame = match encode(&envelope) {
            Ok(frame) => frame,
            Err(error) => {
                let error = TransportError::Malformed(error);
                (self.handlers.on_error)(&error);
                return;
            }
        };

        if let Err(error) = socket.send_frame(&frame) {
            warn!("outbound send failed: {error}");
            (self.handlers.on_error)(&error);
        }
    }

    /// Closes the channel; subsequent sends are no-ops.
    pub fn disconnect(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            socket.close();
        }
        self.pending = None;
    }

    /// Transport-level open state, independent of handshake completion.
    pub fn is_connected(&self) -> bool {
        self.socket
            .as_ref()
            .map(|socket| socket.is_open())
            .unwrap_or(false)
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

/// Transport layer error type.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint was never reachable.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    /// No handshake acknowledgement within the configured bound.
    #[error("handshake timed out")]
    HandshakeTimeout,
    /// The endpoint URL violates the service contract.
    #[error("invalid service endpoint: {0}")]
    InvalidEndpoint(String),
    /// The channel is closed.
    #[error("transport closed")]
    Closed,
    /// An inbound or outbound frame violated the wire schema.
    #[error(transparent)]
    Malformed(#[from] CodecError),
    /// Socket-level I/O failure.
    #[error("transport i/o failure: {0}")]
    Io(String),
}
