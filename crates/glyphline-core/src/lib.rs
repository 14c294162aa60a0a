#![warn(missing_docs)]
//! # glyphline-core
//!
//! ## Purpose
//! Defines the pure data model used across the `glyphline` workspace.
//!
//! ## Responsibilities
//! - Represent capture settings, crop regions, and encoded image formats.
//! - Represent raw frames handed from a frame source to the capture service.
//! - Own the append-only timeline of recognized-text entries.
//! - Model session lifecycle state and the user-facing fault taxonomy.
//!
//! ## Data flow
//! A frame source emits [`Frame`] values; the capture service encodes them
//! into [`EncodedImage`] buffers; the session controller combines an encoded
//! image with recognized text into a [`TimelineStore`] entry and later
//! attaches an [`AudioClip`] by entry id.
//!
//! ## Ownership and lifetimes
//! Frames, encoded images, and timeline entries own their backing buffers
//! (`Vec<u8>`) to avoid borrow coupling between pipeline stages; an entry's
//! image lives exactly as long as the entry.
//!
//! ## Error model
//! Validation failures (frame shape mismatch, out-of-range settings) return
//! [`CoreError`] variants. Timeline updates against unknown ids are no-ops by
//! contract, not errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of still-image encodings supported by the capture pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Lossless PNG.
    Png,
    /// Lossy JPEG; encode quality applies.
    Jpeg,
    /// WebP, encoded losslessly.
    Webp,
}

impl ImageFormat {
    /// Returns the MIME type for this format.
    pub fn mime(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Webp => "image/webp",
        }
    }

    /// Returns `true` when the encoder ignores the quality setting.
    pub fn is_lossless(&self) -> bool {
        !matches!(self, ImageFormat::Jpeg)
    }
}

/// Pixel-space rectangle restricting capture to a sub-area of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    /// Left edge in source-frame pixels.
    pub x: u32,
    /// Top edge in source-frame pixels.
    pub y: u32,
    /// Region width in pixels.
    pub width: u32,
    /// Region height in pixels.
    pub height: u32,
}

impl CropRegion {
    /// Returns `true` when the region covers zero pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Capture configuration owned by the session controller.
///
/// Mutated only through [`CaptureSettings::apply`]; persisted externally as a
/// best-effort side effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Target still-image encoding.
    pub format: ImageFormat,
    /// Encode quality in `0.0..=1.0`; ignored for lossless formats.
    pub quality: f32,
    /// Requested source frame rate, advisory.
    pub frame_rate_hint: u32,
    /// Periodic-capture cadence in seconds, informational.
    pub interval_seconds: f32,
    /// Optional capture sub-region in source-frame pixel coordinates.
    pub crop_region: Option<CropRegion>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            format: ImageFormat::Jpeg,
            quality: 0.9,
            frame_rate_hint: 3,
            interval_seconds: 1.0,
            crop_region: None,
        }
    }
}

impl CaptureSettings {
    /// Merges a partial update into these settings.
    ///
    /// Unset patch fields leave the current value untouched. A patch carrying
    /// `clear_crop_region` removes the configured region.
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(format) = patch.format {
            self.format = format;
        }
        if let Some(quality) = patch.quality {
            self.quality = quality;
        }
        if let Some(frame_rate_hint) = patch.frame_rate_hint {
            self.frame_rate_hint = frame_rate_hint;
        }
        if let Some(interval_seconds) = patch.interval_seconds {
            self.interval_seconds = interval_seconds;
        }
        if patch.clear_crop_region {
            self.crop_region = None;
        } else if let Some(region) = patch.crop_region {
            self.crop_region = Some(region);
        }
    }

    /// Validates settings invariants.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidSettings`] for quality outside `0.0..=1.0`,
    /// a zero frame-rate hint, a non-positive interval, or a zero-area crop
    /// region.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(0.0..=1.0).contains(&self.quality) {
            return Err(CoreError::InvalidSettings(format!(
                "quality must be within 0.0..=1.0, got {}",
                self.quality
            )));
        }
        if self.frame_rate_hint == 0 {
            return Err(CoreError::InvalidSettings(
                "frame rate hint must be greater than zero".to_string(),
            ));
        }
        if self.interval_seconds <= 0.0 {
            return Err(CoreError::InvalidSettings(
                "capture interval must be positive".to_string(),
            ));
        }
        if let Some(region) = &self.crop_region
            && region.is_empty()
        {
            return Err(CoreError::InvalidSettings(
                "crop region must cover at least one pixel".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial settings update merged via [`CaptureSettings::apply`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsPatch {
    /// New image format, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ImageFormat>,
    /// New encode quality, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f32>,
    /// New frame-rate hint, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate_hint: Option<u32>,
    /// New capture interval, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<f32>,
    /// New crop region, when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_region: Option<CropRegion>,
    /// Removes the configured crop region when `true`.
    #[serde(default)]
    pub clear_crop_region: bool,
}

/// One raw frame emitted by a frame source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Capture time in Unix epoch milliseconds.
    pub captured_at_ms: u64,
    /// Raw RGBA pixel buffer (`width * height * 4` bytes).
    pub rgba: Vec<u8>,
}

impl Frame {
    /// Constructs a validated frame.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidFrameShape`] when the pixel buffer length
    /// is not exactly `width * height * 4`.
    pub fn new(
        width: u32,
        height: u32,
        captured_at_ms: u64,
        rgba: Vec<u8>,
    ) -> Result<Self, CoreError> {
        let expected_len = required_rgba_len(width, height)?;
        if rgba.len() != expected_len {
            return Err(CoreError::InvalidFrameShape {
                expected: expected_len,
                actual: rgba.len(),
            });
        }

        Ok(Self {
            width,
            height,
            captured_at_ms,
            rgba,
        })
    }
}

/// An encoded still image produced by the capture service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    /// Encoding applied to `bytes`.
    pub format: ImageFormat,
    /// Encoded image bytes.
    pub bytes: Vec<u8>,
}

/// An audio clip attached to a timeline entry after its creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    /// Raw audio bytes as delivered by the remote peer.
    pub bytes: Vec<u8>,
    /// MIME type of `bytes`.
    pub mime: String,
}

/// Unique, monotonically increasing timeline entry identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub u64);

/// One reviewable timeline unit: captured image, recognized text, and an
/// optional audio clip.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    /// Unique entry identifier.
    pub id: EntryId,
    /// Encoded screenshot bytes; empty when capture failed soft at creation.
    pub image: Vec<u8>,
    /// Encoding of `image`.
    pub image_format: ImageFormat,
    /// Recognized text; user-editable after creation.
    pub text: String,
    /// Entry creation time in Unix epoch milliseconds.
    pub created_at_ms: u64,
    /// Audio clip attached after creation, when one arrived.
    pub audio: Option<AudioClip>,
}

/// Append-only ordered collection of timeline entries.
///
/// Insertion order is the canonical order. Entries are never removed here;
/// deletion, if offered at all, is a presentation-layer concern.
#[derive(Debug, Clone, Default)]
pub struct TimelineStore {
    entries: Vec<TimelineEntry>,
    last_id: u64,
}

impl TimelineStore {
    /// Creates an empty timeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new entry combining an encoded image and recognized text.
    ///
    /// Ids are derived from `now_ms` and bumped past the previous id when the
    /// clock has not advanced, so they stay strictly increasing for this
    /// single-producer store.
    pub fn create_entry(&mut self, image: EncodedImage, text: String, now_ms: u64) -> EntryId {
        let id = now_ms.max(self.last_id + 1);
        self.last_id = id;

        self.entries.push(TimelineEntry {
            id: EntryId(id),
            image: image.bytes,
            image_format: image.format,
            text,
            created_at_ms: now_ms,
            audio: None,
        });
        EntryId(id)
    }

    /// Attaches an audio clip to the entry with the given id.
    ///
    /// # Returns
    /// `false` when no entry has that id; the call is a no-op in that case.
    pub fn attach_audio(&mut self, id: EntryId, clip: AudioClip) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                entry.audio = Some(clip);
                true
            }
            None => false,
        }
    }

    /// Replaces the recognized text of the entry with the given id.
    ///
    /// # Returns
    /// `false` when no entry has that id; the call is a no-op in that case.
    pub fn set_entry_text(&mut self, id: EntryId, text: impl Into<String>) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                entry.text = text.into();
                true
            }
            None => false,
        }
    }

    /// Returns the id of the most recently created entry.
    pub fn latest_entry_id(&self) -> Option<EntryId> {
        self.entries.last().map(|entry| entry.id)
    }

    /// Returns the entry with the given id.
    pub fn entry(&self, id: EntryId) -> Option<&TimelineEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Returns all entries in creation order.
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Returns current entry count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no entries exist.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, id: EntryId) -> Option<&mut TimelineEntry> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }
}

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session resources held.
    Idle,
    /// Capture permission request in flight.
    Acquiring,
    /// Transport open/handshake in flight.
    HandshakeInFlight,
    /// Steady state: remote requests served, remote results ingested.
    Active,
    /// A surfaced fault ended the attempt; retry is user-triggered.
    Error,
}

/// Structured, user-surfaceable session fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFault {
    /// The user dismissed or denied the capture permission prompt.
    PermissionDenied,
    /// No screen or window was available for capture.
    NoSourceAvailable,
    /// The remote service endpoint was not reachable.
    ConnectionRefused,
    /// The handshake did not complete within its bound.
    HandshakeTimeout,
    /// The transport closed while the session was active.
    TransportClosed,
}

impl SessionFault {
    /// Returns the message shown to the user for this fault.
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionFault::PermissionDenied => {
                "Screen capture permission denied. Please allow screen sharing to continue."
            }
            SessionFault::NoSourceAvailable => "No screen or window available for capture.",
            SessionFault::ConnectionRefused => {
                "Failed to connect to server. Please check if the server is running."
            }
            SessionFault::HandshakeTimeout => "Connection handshake timed out. Please try again.",
            SessionFault::TransportClosed => "Connection to the server was lost.",
        }
    }
}

/// Session state snapshot consumed by the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    /// Current lifecycle phase.
    pub phase: SessionPhase,
    /// `true` while a live frame source is attached.
    pub stream_attached: bool,
    /// `true` while the transport channel is open.
    pub transport_connected: bool,
    /// Most recent surfaced fault, cleared on the next attempt.
    pub last_error: Option<SessionFault>,
}

impl SessionState {
    /// Creates the initial idle state.
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            stream_attached: false,
            transport_connected: false,
            last_error: None,
        }
    }

    /// Derived readiness predicate: stream present and transport connected.
    pub fn is_initialized(&self) -> bool {
        self.stream_attached && self.transport_connected
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Error type for core domain validation.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Frame buffer shape does not match declared geometry.
    #[error("invalid frame shape: expected {expected} bytes, got {actual}")]
    InvalidFrameShape {
        /// Expected RGBA byte count.
        expected: usize,
        /// Actual RGBA byte count.
        actual: usize,
    },
    /// Capture settings violate a documented range constraint.
    #[error("invalid capture settings: {0}")]
    InvalidSettings(String),
}

fn required_rgba_len(width: u32, height: u32) -> Result<usize, CoreError> {
    let pixels = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| CoreError::InvalidSettings("frame dimensions overflow".to_string()))?;

    pixels
        .checked_mul(4)
        .ok_or_else(|| CoreError::InvalidSettings("rgba length overflow".to_string()))
}

#[cfg(test)]
mod tests {
    //! Unit tests for settings merge and timeline id behavior.

    use super::*;

    #[test]
    fn patch_merges_only_set_fields() {
        let mut settings = CaptureSettings::default();
        settings.apply(&SettingsPatch {
            quality: Some(0.5),
            ..SettingsPatch::default()
        });

        assert_eq!(settings.quality, 0.5);
        assert_eq!(settings.format, ImageFormat::Jpeg);
    }

    #[test]
    fn clear_crop_region_removes_configured_region() {
        let mut settings = CaptureSettings {
            crop_region: Some(CropRegion {
                x: 1,
                y: 1,
                width: 2,
                height: 2,
            }),
            ..CaptureSettings::default()
        };

        settings.apply(&SettingsPatch {
            clear_crop_region: true,
            ..SettingsPatch::default()
        });
        assert!(settings.crop_region.is_none());
    }

    #[test]
    fn serialized_settings_deserialize_as_a_full_patch() {
        // The settings store persists full settings and reloads them as a
        // patch; field names must stay aligned for that round trip.
        let settings = CaptureSettings {
            format: ImageFormat::Webp,
            quality: 0.75,
            frame_rate_hint: 5,
            interval_seconds: 2.0,
            crop_region: Some(CropRegion {
                x: 1,
                y: 2,
                width: 3,
                height: 4,
            }),
        };

        let raw = serde_json::to_string(&settings).expect("settings should serialize");
        let patch: SettingsPatch = serde_json::from_str(&raw).expect("patch should deserialize");

        assert_eq!(patch.format, Some(ImageFormat::Webp));
        assert_eq!(patch.quality, Some(0.75));
        assert_eq!(patch.frame_rate_hint, Some(5));
        assert_eq!(patch.interval_seconds, Some(2.0));
        assert_eq!(patch.crop_region, settings.crop_region);
        assert!(!patch.clear_crop_region);
    }

    #[test]
    fn entry_ids_stay_strictly_increasing_on_a_stalled_clock() {
        let mut timeline = TimelineStore::new();
        let image = EncodedImage {
            format: ImageFormat::Png,
            bytes: vec![1, 2, 3],
        };

        let first = timeline.create_entry(image.clone(), "a".to_string(), 1_000);
        let second = timeline.create_entry(image, "b".to_string(), 1_000);
        assert!(second > first);
    }
}
