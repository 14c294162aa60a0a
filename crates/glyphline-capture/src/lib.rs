#![warn(missing_docs)]
//! # glyphline-capture
//!
//! ## Purpose
//! Provides frame acquisition and still-image encoding for the session
//! protocol engine.
//!
//! ## Responsibilities
//! - Define the permission seam ([`SourceProvider`]) and the frame seam
//!   ([`FrameSource`]).
//! - Expose a real display-backed source on supported platforms and a
//!   deterministic synthetic source for CI and unit tests.
//! - Encode frames to the configured format/quality, optionally restricted
//!   to a crop region.
//!
//! ## Data flow
//! The session controller acquires a source through a provider, binds it to
//! a [`CaptureService`], and the service turns live frames into
//! [`EncodedImage`] buffers for the transport and the timeline.
//!
//! ## Ownership and lifetimes
//! Frames are owned values; no borrowed frame memory escapes a source. The
//! service keeps one reusable scratch buffer for crop staging, so two
//! captures must not run concurrently against the same service.
//!
//! ## Error model
//! Source acquisition fails loud ([`AcquireError`]) because the user must
//! see it. Frame capture fails soft: [`CaptureService::capture_frame`]
//! returns `None` and logs, never an error, so a bad frame can never take
//! the session down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use glyphline_core::{CaptureSettings, CropRegion, EncodedImage, Frame, ImageFormat};
use image::{ExtendedColorType, ImageEncoder};
use log::{debug, warn};
use thiserror::Error;

/// Parameters forwarded to the capture-permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceRequest {
    /// Requested source frame rate, advisory.
    pub frame_rate_hint: u32,
}

/// Seam over the platform capture-permission API.
pub trait SourceProvider: Send + Sync {
    /// Requests a live frame source from the user/platform.
    ///
    /// # Errors
    /// Returns [`AcquireError::PermissionDenied`] when the user dismisses or
    /// denies the prompt and [`AcquireError::NoSourceAvailable`] when no
    /// screen or window can be shared.
    fn acquire(&self, request: &SourceRequest) -> Result<Arc<dyn FrameSource>, AcquireError>;
}

/// A live video source shared read-only between the preview and capture.
pub trait FrameSource: Send + Sync {
    /// Produces the current frame.
    ///
    /// # Errors
    /// Returns [`CaptureError`] when the source is stopped or the backend
    /// fails; callers treat this as a soft failure.
    fn next_frame(&self) -> Result<Frame, CaptureError>;

    /// Stops the underlying tracks; subsequent frames fail.
    fn stop(&self);
}

/// Deterministic synthetic source for tests and non-Windows targets.
///
/// Emits a moving gradient so successive frames differ, with a sequence
/// counter standing in for the capture clock.
#[derive(Debug)]
pub struct SyntheticFrameSource {
    width: u32,
    height: u32,
    sequence: AtomicU64,
    stopped: AtomicBool,
}

impl SyntheticFrameSource {
    /// Creates a synthetic source with the given frame geometry.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            sequence: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    /// Returns `true` once [`FrameSource::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl FrameSource for SyntheticFrameSource {
    fn next_frame(&self) -> Result<Frame, CaptureError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(CaptureError::Source("synthetic source stopped".to_string()));
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let mut rgba = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for y in 0..self.height as u64 {
            for x in 0..self.width as u64 {
                let value = ((x + y + sequence) % 256) as u8;
                rgba.extend_from_slice(&[value, value, value, 255]);
            }
        }

        Frame::new(self.width, self.height, sequence, rgba)
            .map_err(|error| CaptureError::Source(error.to_string()))
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Provider yielding a fresh synthetic source per acquisition.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticSourceProvider {
    width: u32,
    height: u32,
}

impl SyntheticSourceProvider {
    /// Creates a provider emitting sources with the given geometry.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl SourceProvider for SyntheticSourceProvider {
    fn acquire(&self, _request: &SourceRequest) -> Result<Arc<dyn FrameSource>, AcquireError> {
        Ok(Arc::new(SyntheticFrameSource::new(self.width, self.height)))
    }
}

/// Real display source for supported desktop targets.
///
/// Screen handles are re-acquired on every capture so display topology
/// changes surface as soft failures instead of stale frames.
#[cfg(windows)]
#[derive(Debug)]
pub struct DisplayFrameSource {
    screen_index: usize,
    stopped: AtomicBool,
}

#[cfg(windows)]
impl FrameSource for DisplayFrameSource {
    fn next_frame(&self) -> Result<Frame, CaptureError> {
        use screenshots::Screen;

        if self.stopped.load(Ordering::SeqCst) {
            return Err(CaptureError::Source("display source stopped".to_string()));
        }

        let screens = Screen::all()
            .map_err(|error| CaptureError::Source(format!("screen refresh failed: {error}")))?;
        let screen = screens.get(self.screen_index).ok_or_else(|| {
            CaptureError::Source(format!(
                "display index {} is not available anymore",
                self.screen_index
            ))
        })?;

        let captured = screen
            .capture()
            .map_err(|error| CaptureError::Source(format!("screen capture failed: {error}")))?;
        let width = captured.width();
        let height = captured.height();

        Frame::new(width, height, now_ms(), captured.into_raw())
            .map_err(|error| CaptureError::Source(error.to_string()))
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Provider backed by the primary physical display.
#[cfg(windows)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DisplaySourceProvider;

#[cfg(windows)]
impl SourceProvider for DisplaySourceProvider {
    fn acquire(&self, _request: &SourceRequest) -> Result<Arc<dyn FrameSource>, AcquireError> {
        use screenshots::Screen;

        let screens = Screen::all().map_err(|_| AcquireError::NoSourceAvailable)?;
        if screens.is_empty() {
            return Err(AcquireError::NoSourceAvailable);
        }

        Ok(Arc::new(DisplayFrameSource {
            screen_index: 0,
            stopped: AtomicBool::new(false),
        }))
    }
}

/// Encodes still frames from the bound source per the current settings.
pub struct CaptureService {
    source: Option<Arc<dyn FrameSource>>,
    settings: CaptureSettings,
    // Shared crop staging buffer; concurrent captures against one service
    // are not supported.
    scratch: Vec<u8>,
}

impl CaptureService {
    /// Creates a service with no bound source.
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            source: None,
            settings,
            scratch: Vec::new(),
        }
    }

    /// Binds the live source used by subsequent captures.
    pub fn set_source(&mut self, source: Arc<dyn FrameSource>) {
        self.source = Some(source);
    }

    /// Detaches the current source; captures fail soft until rebound.
    pub fn clear_source(&mut self) {
        self.source = None;
    }

    /// Returns `true` when a source is bound.
    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Replaces the capture settings; visible to the next capture call.
    pub fn update_settings(&mut self, settings: CaptureSettings) {
        self.settings = settings;
    }

    /// Returns the settings applied to the next capture.
    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Captures and encodes one frame.
    ///
    /// When `use_crop` is true and a crop region is configured, the region
    /// is mapped 1:1 onto source pixels and clamped to the frame bounds; a
    /// region entirely outside the frame is a soft failure. When `use_crop`
    /// is false, or no region is configured, the full frame is captured.
    ///
    /// Fails soft on every path: no source, a stopped source, a
    /// zero-dimension frame, or an encoder failure log and return `None`.
    pub fn capture_frame(&mut self, use_crop: bool) -> Option<EncodedImage> {
        let Some(source) = self.source.clone() else {
            debug!("capture skipped: no active source");
            return None;
        };

        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(error) => {
                warn!("capture skipped: {error}");
                return None;
            }
        };

        if frame.width == 0 || frame.height == 0 {
            warn!("capture skipped: source produced a zero-dimension frame");
            return None;
        }

        let settings = self.settings.clone();
        let (width, height, cropped) = match settings.crop_region.filter(|_| use_crop) {
            Some(region) => {
                let Some(clamped) = clamp_region(region, frame.width, frame.height) else {
                    warn!(
                        "capture skipped: crop region ({},{} {}x{}) lies outside the {}x{} frame",
                        region.x, region.y, region.width, region.height, frame.width, frame.height
                    );
                    return None;
                };
                stage_region(&frame, clamped, &mut self.scratch);
                (clamped.width, clamped.height, true)
            }
            None => (frame.width, frame.height, false),
        };

        let pixels: &[u8] = if cropped { &self.scratch } else { &frame.rgba };
        match encode_pixels(settings.format, settings.quality, width, height, pixels) {
            Ok(bytes) => Some(EncodedImage {
                format: settings.format,
                bytes,
            }),
            Err(error) => {
                warn!("frame encode failed: {error}");
                None
            }
        }
    }
}

/// Intersects a crop region with the frame bounds.
///
/// Returns `None` when the intersection covers zero pixels.
pub fn clamp_region(region: CropRegion, frame_width: u32, frame_height: u32) -> Option<CropRegion> {
    if region.x >= frame_width || region.y >= frame_height {
        return None;
    }

    let width = region.width.min(frame_width - region.x);
    let height = region.height.min(frame_height - region.y);
    if width == 0 || height == 0 {
        return None;
    }

    Some(CropRegion {
        x: region.x,
        y: region.y,
        width,
        height,
    })
}

fn stage_region(frame: &Frame, region: CropRegion, scratch: &mut Vec<u8>) {
    let row_len = region.width as usize * 4;
    scratch.clear();
    scratch.reserve(row_len * region.height as usize);

    for y in 0..region.height as usize {
        let src_y = region.y as usize + y;
        let src_offset = (src_y * frame.width as usize + region.x as usize) * 4;
        scratch.extend_from_slice(&frame.rgba[src_offset..src_offset + row_len]);
    }
}

fn encode_pixels(
    format: ImageFormat,
    quality: f32,
    width: u32,
    height: u32,
    rgba: &[u8],
) -> Result<Vec<u8>, CaptureError> {
    let mut out = Vec::new();
    match format {
        ImageFormat::Png => {
            image::codecs::png::PngEncoder::new(&mut out)
                .write_image(rgba, width, height, ExtendedColorType::Rgba8)
                .map_err(|error| CaptureError::Encode(error.to_string()))?;
        }
        ImageFormat::Jpeg => {
            // The JPEG encoder has no alpha channel; strip it first.
            let rgb = rgba_to_rgb(rgba);
            let quality = (quality * 100.0).clamp(1.0, 100.0) as u8;
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality)
                .write_image(&rgb, width, height, ExtendedColorType::Rgb8)
                .map_err(|error| CaptureError::Encode(error.to_string()))?;
        }
        ImageFormat::Webp => {
            // Lossless WebP; the quality setting does not apply.
            image::codecs::webp::WebPEncoder::new_lossless(&mut out)
                .write_image(rgba, width, height, ExtendedColorType::Rgba8)
                .map_err(|error| CaptureError::Encode(error.to_string()))?;
        }
    }
    Ok(out)
}

fn rgba_to_rgb(rgba: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
    for pixel in rgba.chunks_exact(4) {
        rgb.extend_from_slice(&pixel[..3]);
    }
    rgb
}

#[cfg(windows)]
fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Capture layer error type.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The frame source failed or was stopped.
    #[error("frame source failure: {0}")]
    Source(String),
    /// The still-image encoder rejected the frame.
    #[error("image encode failure: {0}")]
    Encode(String),
}

/// Errors from the capture-permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// The user dismissed or denied the permission prompt.
    #[error("screen capture permission denied")]
    PermissionDenied,
    /// No screen or window is available for capture.
    #[error("no screen or window available for capture")]
    NoSourceAvailable,
}
