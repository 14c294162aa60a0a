#![warn(missing_docs)]
//! # glyphline-app
//!
//! ## Purpose
//! Wires the session protocol engine into a runnable shell: configuration,
//! logging, collaborator selection, and status projection.
//!
//! ## Responsibilities
//! - Read service/settings/cards configuration from the environment.
//! - Select the platform source provider (real display on Windows,
//!   synthetic elsewhere).
//! - Project [`SessionState`] into a flat status snapshot for a thin UI.
//! - Enforce the runtime capture kill-switch.
//!
//! ## Data flow
//! Env config -> [`build_controller`] -> `initialize`/`pump` loop in the
//! binary -> [`project_runtime_status`] for display.
//!
//! ## Error model
//! Configuration problems surface before the session starts; everything
//! after that is owned by the session controller's fault surface.

use std::path::PathBuf;
use std::sync::Arc;

use glyphline_capture::SourceProvider;
use glyphline_cards::CardServiceClient;
use glyphline_core::SessionState;
use glyphline_session::{CardSink, JsonFileSettingsStore, SessionController, WebSocketConnector};
use log::warn;

/// Build-time application version loaded from the root `VERSION` file.
pub const APP_VERSION: &str = env!("GLYPHLINE_VERSION");

/// Default OCR service endpoint.
pub const DEFAULT_SERVICE_URL: &str = "ws://127.0.0.1:49156";

/// Default on-disk location for persisted capture settings.
pub const DEFAULT_SETTINGS_PATH: &str = "glyphline-settings.json";

/// Returns the app version sourced from the root `VERSION` file.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// Runtime configuration resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// OCR service websocket endpoint.
    pub service_url: String,
    /// Capture-settings persistence path.
    pub settings_path: PathBuf,
    /// Flashcard-update endpoint; `None` disables the card sink.
    pub cards_url: Option<String>,
}

/// Resolves configuration from `GLYPHLINE_*` environment variables.
pub fn config_from_env() -> AppConfig {
    let service_url = std::env::var("GLYPHLINE_SERVICE_URL")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string());

    let settings_path = std::env::var("GLYPHLINE_SETTINGS_PATH")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH));

    let cards_url = std::env::var("GLYPHLINE_CARDS_URL")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    AppConfig {
        service_url,
        settings_path,
        cards_url,
    }
}

/// Checks the runtime kill-switch env var.
///
/// Semantics:
/// - Unset => capture enabled.
/// - `0`, `false`, `off` (case-insensitive) => capture disabled.
/// - Any other value => capture enabled.
pub fn capture_enabled_from_env() -> bool {
    match std::env::var("GLYPHLINE_CAPTURE_ENABLED") {
        Ok(value) => {
            let normalized = value.trim().to_ascii_lowercase();
            !(normalized == "0" || normalized == "false" || normalized == "off")
        }
        Err(_) => true,
    }
}

/// Returns the frame-source provider for this platform.
pub fn platform_source_provider() -> Box<dyn SourceProvider> {
    #[cfg(windows)]
    {
        Box::new(glyphline_capture::DisplaySourceProvider)
    }

    #[cfg(not(windows))]
    {
        // No real display backend here yet; the synthetic source still
        // exercises the full protocol path.
        Box::new(glyphline_capture::SyntheticSourceProvider::new(1280, 720))
    }
}

/// Builds a session controller from resolved configuration.
pub fn build_controller(config: &AppConfig) -> SessionController {
    let card_sink: Option<Arc<dyn CardSink>> = config.cards_url.as_deref().and_then(|url| {
        match CardServiceClient::new(url) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn CardSink>),
            Err(error) => {
                warn!("flashcard integration disabled: {error}");
                None
            }
        }
    });

    SessionController::new(
        config.service_url.clone(),
        platform_source_provider(),
        Box::new(WebSocketConnector),
        Box::new(JsonFileSettingsStore::new(&config.settings_path)),
        card_sink,
    )
}

/// Consolidated runtime status snapshot for simple UI projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeStatus {
    /// Session phase as human-readable string.
    pub phase: String,
    /// Whether stream and transport are both up.
    pub initialized: bool,
    /// Whether the kill-switch currently allows capture.
    pub capture_enabled: bool,
    /// User-facing message for the last fault, when one is set.
    pub error_message: Option<&'static str>,
}

/// Projects session state into a flat status snapshot.
pub fn project_runtime_status(state: &SessionState) -> RuntimeStatus {
    RuntimeStatus {
        phase: format!("{:?}", state.phase),
        initialized: state.is_initialized(),
        capture_enabled: capture_enabled_from_env(),
        error_message: state.last_error.map(|fault| fault.user_message()),
    }
}
