#![warn(missing_docs)]
//! # glyphline-cards
//!
//! ## Purpose
//! Pushes timeline media into the local flashcard application over its
//! loopback HTTP API.
//!
//! ## Responsibilities
//! - Speak the JSON-RPC-style `{action, version, params}` protocol.
//! - Store media files (base64) and update the most recent card's fields.
//! - Keep every failure local: the sink is best-effort by contract.
//!
//! ## Data flow
//! The session controller hands an entry id plus an image or audio buffer
//! to the [`glyphline_session::CardSink`] implementation here; the client
//! stores the media and patches the latest card.
//!
//! ## Error model
//! [`CardServiceError`] for construction and request failures. The
//! `CardSink` impl logs and swallows errors so a dead or absent flashcard
//! app never disturbs the session.

use base64::Engine as _;
use glyphline_core::{EntryId, ImageFormat};
use glyphline_session::CardSink;
use log::{debug, warn};
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

/// Protocol version expected by the flashcard API.
const PROTOCOL_VERSION: u32 = 6;

/// Card field receiving the screenshot.
const PICTURE_FIELD: &str = "Picture";

/// Card field receiving the audio clip.
const AUDIO_FIELD: &str = "SentenceAudio";

/// Client for the local flashcard-update API.
pub struct CardServiceClient {
    endpoint: String,
    http: reqwest::blocking::Client,
}

impl CardServiceClient {
    /// Creates a validated client.
    ///
    /// # Errors
    /// Returns [`CardServiceError::InvalidEndpoint`] when the endpoint is
    /// not an HTTP URL on the loopback host.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, CardServiceError> {
        let endpoint = endpoint.into();
        validate_card_endpoint(&endpoint)?;
        Ok(Self {
            endpoint,
            http: reqwest::blocking::Client::new(),
        })
    }

    /// Stores a media file and updates the latest card's field with it.
    ///
    /// # Errors
    /// Returns [`CardServiceError`] when no card exists or any request
    /// fails; callers going through the [`CardSink`] surface get these
    /// logged and swallowed instead.
    pub fn attach_media_to_latest_card(
        &self,
        filename: &str,
        media: &[u8],
        field: &str,
        field_value: &str,
    ) -> Result<(), CardServiceError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(media);
        self.invoke(
            "storeMediaFile",
            json!({ "filename": filename, "data": encoded }),
        )?;

        let note_id = self.latest_note_id()?;
        self.invoke(
            "updateNoteFields",
            json!({ "note": { "id": note_id, "fields": { field: field_value } } }),
        )?;
        Ok(())
    }

    fn latest_note_id(&self) -> Result<i64, CardServiceError> {
        let found = self.invoke("findCards", json!({ "query": "added:1" }))?;
        let card_id = found
            .as_array()
            .and_then(|cards| cards.last())
            .and_then(Value::as_i64)
            .ok_or_else(|| CardServiceError::Service("no cards found to update".to_string()))?;

        let info = self.invoke("cardsInfo", json!({ "cards": [card_id] }))?;
        info.as_array()
            .and_then(|cards| cards.first())
            .and_then(|card| card.get("note"))
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                CardServiceError::Service("could not resolve note for latest card".to_string())
            })
    }

    fn invoke(&self, action: &str, params: Value) -> Result<Value, CardServiceError> {
        let body = json!({
            "action": action,
            "version": PROTOCOL_VERSION,
            "params": params,
        });

        let response: Value = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|error| CardServiceError::Http(error.to_string()))?
            .error_for_status()
            .map_err(|error| CardServiceError::Http(error.to_string()))?
            .json()
            .map_err(|error| CardServiceError::Http(error.to_string()))?;

        if let Some(error) = response.get("error").filter(|error| !error.is_null()) {
            return Err(CardServiceError::Service(error.to_string()));
        }

        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }
}

impl CardSink for CardServiceClient {
    fn push_image(&self, entry: EntryId, format: ImageFormat, image: &[u8]) {
        let extension = match format {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Webp => {
                // The flashcard app only accepts PNG and JPEG images.
                debug!("skipping card image for entry {}: webp unsupported", entry.0);
                return;
            }
        };

        let filename = format!("screenshot_{}.{extension}", entry.0);
        let field_value = format!("<img src=\"{filename}\">");
        if let Err(error) =
            self.attach_media_to_latest_card(&filename, image, PICTURE_FIELD, &field_value)
        {
            warn!("card image update failed for entry {}: {error}", entry.0);
        }
    }

    fn push_audio(&self, entry: EntryId, mime: &str, audio: &[u8]) {
        if mime != "audio/mpeg" {
            debug!(
                "skipping card audio for entry {}: unsupported mime {mime}",
                entry.0
            );
            return;
        }

        let filename = format!("audio_{}.mp3", entry.0);
        let field_value = format!("[sound:{filename}]");
        if let Err(error) =
            self.attach_media_to_latest_card(&filename, audio, AUDIO_FIELD, &field_value)
        {
            warn!("card audio update failed for entry {}: {error}", entry.0);
        }
    }
}

/// Validates the flashcard endpoint: HTTP over loopback only.
///
/// # Errors
/// Returns [`CardServiceError::InvalidEndpoint`] otherwise.
pub fn validate_card_endpoint(endpoint: &str) -> Result<(), CardServiceError> {
    let parsed = Url::parse(endpoint)
        .map_err(|error| CardServiceError::InvalidEndpoint(format!("invalid url: {error}")))?;

    if parsed.scheme() != "http" {
        return Err(CardServiceError::InvalidEndpoint(
            "card endpoint must use plain http".to_string(),
        ));
    }

    let loopback = matches!(parsed.host_str(), Some("127.0.0.1") | Some("localhost"));
    if !loopback {
        return Err(CardServiceError::InvalidEndpoint(
            "card endpoint must stay on the loopback host".to_string(),
        ));
    }

    Ok(())
}

/// Flashcard client error type.
#[derive(Debug, Error)]
pub enum CardServiceError {
    /// Endpoint violates the loopback policy.
    #[error("invalid card endpoint: {0}")]
    InvalidEndpoint(String),
    /// HTTP transport failure.
    #[error("card service request failed: {0}")]
    Http(String),
    /// The service answered with an error payload.
    #[error("card service error: {0}")]
    Service(String),
}
