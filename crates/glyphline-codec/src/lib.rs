#![warn(missing_docs)]
//! # glyphline-codec
//!
//! ## Purpose
//! Encodes and decodes the binary wire envelope exchanged with the remote
//! OCR service.
//!
//! ## Responsibilities
//! - Define the envelope schema: timestamp plus a tagged payload union.
//! - Encode envelopes builder-style into a single pre-sized buffer.
//! - Decode inbound frames zero-copy into a borrowed tagged-variant value.
//!
//! ## Data flow
//! The transport session hands inbound binary frames to [`decode`] and sends
//! the bytes produced by [`encode`]. Both functions are pure; no I/O happens
//! here.
//!
//! ## Ownership and lifetimes
//! Decoded payloads borrow string and byte fields directly from the input
//! frame, so a multi-megabyte image or audio vector is never copied on the
//! read path and copied exactly once on the write path.
//!
//! ## Error model
//! Any frame that is truncated relative to its length fields, carries an
//! unknown discriminant, or declares a payload length that disagrees with
//! the buffer is a malformed message and fails with [`CodecError`]. Reading
//! a payload as the wrong kind is impossible by construction: each decode
//! yields exactly one [`Payload`] variant.
//!
//! ## Wire layout
//! Little-endian throughout:
//!
//! ```text
//! [0]      u8   payload kind (0 Init, 1 RequestScreenshot,
//!               2 ResponseScreenshot, 3 OcrResult, 4 Audio)
//! [1..9]   i64  producer timestamp in milliseconds
//! [9..13]  u32  payload section length
//! [13..]        payload section
//! ```
//!
//! Payload sections: `ResponseScreenshot` = u16 key length + key + u8 image
//! format + u32 image length + image bytes; `OcrResult` = u32 text length +
//! text; `Audio` = u32 audio length + audio bytes + u16 mime length + mime;
//! `Init` and `RequestScreenshot` are empty.

use glyphline_core::ImageFormat;
use thiserror::Error;

/// Envelope header length: kind tag + timestamp + payload length.
const HEADER_LEN: usize = 1 + 8 + 4;

const TAG_INIT: u8 = 0;
const TAG_REQUEST_SCREENSHOT: u8 = 1;
const TAG_RESPONSE_SCREENSHOT: u8 = 2;
const TAG_OCR_RESULT: u8 = 3;
const TAG_AUDIO: u8 = 4;

const FORMAT_PNG: u8 = 0;
const FORMAT_JPEG: u8 = 1;
const FORMAT_WEBP: u8 = 2;

/// The wire envelope: a producer timestamp and one tagged payload.
///
/// The timestamp is the producer's local clock at encode time, in
/// milliseconds. It exists for diagnostics and display ordering; peers'
/// clocks are not comparable and the decoder never validates monotonicity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope<'a> {
    /// Producer clock at encode time, milliseconds.
    pub timestamp_ms: i64,
    /// Kind-specific payload.
    pub payload: Payload<'a>,
}

/// Tagged payload union. Exactly one variant per wire discriminant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload<'a> {
    /// Handshake readiness signal; carries no fields.
    Init,
    /// Remote asks the client for a screenshot; carries no fields.
    RequestScreenshot,
    /// Client answers a screenshot request.
    ResponseScreenshot(ScreenshotReply<'a>),
    /// Remote delivers recognized text.
    OcrResult(OcrResult<'a>),
    /// Remote delivers an audio clip for the latest result.
    Audio(AudioClip<'a>),
}

/// `ResponseScreenshot` payload fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotReply<'a> {
    /// Label for the image slot; producers set `"screenshot"`.
    pub key: &'a str,
    /// Encoding of `image`.
    pub format: ImageFormat,
    /// Encoded image bytes. Producers send non-empty buffers; the remote
    /// may treat an empty buffer as absent.
    pub image: &'a [u8],
}

/// `OcrResult` payload fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrResult<'a> {
    /// Recognized text; empty means "no text found".
    pub text: &'a str,
}

/// `Audio` payload fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip<'a> {
    /// Raw audio bytes.
    pub audio: &'a [u8],
    /// MIME type of `audio`.
    pub mime: &'a str,
}

/// Encodes one envelope into a wire frame.
///
/// The buffer is sized up front and the payload section is written before
/// the header fields, so every length field is known before the bytes that
/// reference it are filled in. Byte-vector fields are copied from the
/// caller's buffers exactly once.
///
/// # Errors
/// Returns [`CodecError::OversizeField`] when a field exceeds its length
/// prefix (64 KiB for key/mime strings, 4 GiB for byte vectors).
pub fn encode(envelope: &Envelope<'_>) -> Result<Vec<u8>, CodecError> {
    let payload_len = encoded_payload_len(&envelope.payload)?;
    let mut frame = vec![0_u8; HEADER_LEN];
    frame.reserve_exact(payload_len);

    match &envelope.payload {
        Payload::Init | Payload::RequestScreenshot => {}
        Payload::ResponseScreenshot(reply) => {
            put_short_str(&mut frame, reply.key)?;
            frame.push(format_tag(reply.format));
            put_long_bytes(&mut frame, reply.image)?;
        }
        Payload::OcrResult(result) => {
            put_long_bytes(&mut frame, result.text.as_bytes())?;
        }
        Payload::Audio(clip) => {
            put_long_bytes(&mut frame, clip.audio)?;
            put_short_str(&mut frame, clip.mime)?;
        }
    }

    // Header fields last: the payload section above fixed payload_len.
    frame[0] = payload_tag(&envelope.payload);
    frame[1..9].copy_from_slice(&envelope.timestamp_ms.to_le_bytes());
    frame[9..13].copy_from_slice(&(payload_len as u32).to_le_bytes());
    Ok(frame)
}

/// Decodes one wire frame into an envelope borrowing from `bytes`.
///
/// # Errors
/// Returns a [`CodecError`] when the discriminant is unrecognized or the
/// buffer is truncated, oversized, or internally inconsistent relative to
/// its length fields. Never reads out of bounds and never panics.
pub fn decode(bytes: &[u8]) -> Result<Envelope<'_>, CodecError> {
    let mut reader = WireReader::new(bytes);
    let tag = reader.u8()?;
    let timestamp_ms = reader.i64()?;
    let payload_len = reader.u32()? as usize;

    if reader.remaining() != payload_len {
        return Err(CodecError::PayloadLengthMismatch {
            declared: payload_len,
            actual: reader.remaining(),
        });
    }

    let payload = match tag {
        TAG_INIT => Payload::Init,
        TAG_REQUEST_SCREENSHOT => Payload::RequestScreenshot,
        TAG_RESPONSE_SCREENSHOT => {
            let key = reader.short_str()?;
            let format = image_format(reader.u8()?)?;
            let image = reader.long_bytes()?;
            Payload::ResponseScreenshot(ScreenshotReply { key, format, image })
        }
        TAG_OCR_RESULT => {
            let text = reader.long_str()?;
            Payload::OcrResult(OcrResult { text })
        }
        TAG_AUDIO => {
            let audio = reader.long_bytes()?;
            let mime = reader.short_str()?;
            Payload::Audio(AudioClip { audio, mime })
        }
        other => return Err(CodecError::UnknownPayloadKind(other)),
    };

    if reader.remaining() != 0 {
        return Err(CodecError::TrailingBytes {
            count: reader.remaining(),
        });
    }

    Ok(Envelope {
        timestamp_ms,
        payload,
    })
}

/// Errors for malformed frames and oversize encode inputs.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The envelope discriminant does not name a known payload kind.
    #[error("malformed message: unknown payload kind {0}")]
    UnknownPayloadKind(u8),
    /// The image format tag does not name a known encoding.
    #[error("malformed message: unknown image format tag {0}")]
    UnknownImageFormat(u8),
    /// The buffer ended before a declared field.
    #[error("malformed message: truncated frame, needed {needed} bytes, had {available}")]
    Truncated {
        /// Bytes required by the next field.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },
    /// Declared payload length disagrees with the frame size.
    #[error("malformed message: payload length declares {declared} bytes, frame carries {actual}")]
    PayloadLengthMismatch {
        /// Length declared in the header.
        declared: usize,
        /// Bytes actually present after the header.
        actual: usize,
    },
    /// Bytes remained after the payload was fully parsed.
    #[error("malformed message: {count} trailing bytes after payload")]
    TrailingBytes {
        /// Number of unparsed trailing bytes.
        count: usize,
    },
    /// A string field did not hold valid UTF-8.
    #[error("malformed message: invalid utf-8 in string field")]
    InvalidText(#[from] std::str::Utf8Error),
    /// An encode-side field exceeds its wire length prefix.
    #[error("field too long for wire encoding: {0}")]
    OversizeField(&'static str),
}

fn payload_tag(payload: &Payload<'_>) -> u8 {
    match payload {
        Payload::Init => TAG_INIT,
        Payload::RequestScreenshot => TAG_REQUEST_SCREENSHOT,
        Payload::ResponseScreenshot(_) => TAG_RESPONSE_SCREENSHOT,
        Payload::OcrResult(_) => TAG_OCR_RESULT,
        Payload::Audio(_) => TAG_AUDIO,
    }
}

fn format_tag(format: ImageFormat) -> u8 {
    match format {
        ImageFormat::Png => FORMAT_PNG,
        ImageFormat::Jpeg => FORMAT_JPEG,
        ImageFormat::Webp => FORMAT_WEBP,
    }
}

fn image_format(tag: u8) -> Result<ImageFormat, CodecError> {
    match tag {
        FORMAT_PNG => Ok(ImageFormat::Png),
        FORMAT_JPEG => Ok(ImageFormat::Jpeg),
        FORMAT_WEBP => Ok(ImageFormat::Webp),
        other => Err(CodecError::UnknownImageFormat(other)),
    }
}

fn encoded_payload_len(payload: &Payload<'_>) -> Result<usize, CodecError> {
    let len = match payload {
        Payload::Init | Payload::RequestScreenshot => 0,
        Payload::ResponseScreenshot(reply) => {
            check_short(reply.key.len(), "screenshot key")?;
            check_long(reply.image.len(), "screenshot image")?;
            2 + reply.key.len() + 1 + 4 + reply.image.len()
        }
        Payload::OcrResult(result) => {
            check_long(result.text.len(), "ocr text")?;
            4 + result.text.len()
        }
        Payload::Audio(clip) => {
            check_long(clip.audio.len(), "audio bytes")?;
            check_short(clip.mime.len(), "audio mime")?;
            4 + clip.audio.len() + 2 + clip.mime.len()
        }
    };
    check_long(len, "payload section")?;
    Ok(len)
}

fn check_short(len: usize, field: &'static str) -> Result<(), CodecError> {
    if len > u16::MAX as usize {
        return Err(CodecError::OversizeField(field));
    }
    Ok(())
}

fn check_long(len: usize, field: &'static str) -> Result<(), CodecError> {
    if len > u32::MAX as usize {
        return Err(CodecError::OversizeField(field));
    }
    Ok(())
}

fn put_short_str(frame: &mut Vec<u8>, value: &str) -> Result<(), CodecError> {
    check_short(value.len(), "string field")?;
    frame.extend_from_slice(&(value.len() as u16).to_le_bytes());
    frame.extend_from_slice(value.as_bytes());
    Ok(())
}

fn put_long_bytes(frame: &mut Vec<u8>, value: &[u8]) -> Result<(), CodecError> {
    check_long(value.len(), "byte field")?;
    frame.extend_from_slice(&(value.len() as u32).to_le_bytes());
    frame.extend_from_slice(value);
    Ok(())
}

/// Cursor over an inbound frame with bounds-checked reads.
struct WireReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> WireReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < count {
            return Err(CodecError::Truncated {
                needed: count,
                available: self.remaining(),
            });
        }
        let slice = &self.bytes[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn i64(&mut self) -> Result<i64, CodecError> {
        let bytes = self.take(8)?;
        let mut raw = [0_u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_le_bytes(raw))
    }

    fn short_str(&mut self) -> Result<&'a str, CodecError> {
        let len = self.u16()? as usize;
        Ok(std::str::from_utf8(self.take(len)?)?)
    }

    fn long_bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn long_str(&mut self) -> Result<&'a str, CodecError> {
        let len = self.u32()? as usize;
        Ok(std::str::from_utf8(self.take(len)?)?)
    }
}
