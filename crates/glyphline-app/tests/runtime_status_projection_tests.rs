//! Integration tests for UI status projection.

use glyphline_app::project_runtime_status;
use glyphline_core::{SessionFault, SessionPhase, SessionState};

#[test]
fn runtime_status_projection_tests_idle_state_projects_cleanly() {
    let status = project_runtime_status(&SessionState::new());
    assert_eq!(status.phase, "Idle");
    assert!(!status.initialized);
    assert!(status.error_message.is_none());
}

#[test]
fn runtime_status_projection_tests_fault_maps_to_user_message() {
    let state = SessionState {
        phase: SessionPhase::Error,
        stream_attached: false,
        transport_connected: false,
        last_error: Some(SessionFault::ConnectionRefused),
    };

    let status = project_runtime_status(&state);
    assert_eq!(status.phase, "Error");
    assert_eq!(
        status.error_message,
        Some("Failed to connect to server. Please check if the server is running.")
    );
}

#[test]
fn runtime_status_projection_tests_active_state_reports_initialized() {
    let state = SessionState {
        phase: SessionPhase::Active,
        stream_attached: true,
        transport_connected: true,
        last_error: None,
    };

    assert!(project_runtime_status(&state).initialized);
}
