//! Integration tests for build-time version stamping.

use glyphline_app::app_version;

#[test]
fn version_display_tests_version_is_stamped_from_version_file() {
    let version = app_version();
    assert!(!version.trim().is_empty());
    assert!(
        version.chars().next().is_some_and(|c| c.is_ascii_digit()),
        "version should start with a digit, got {version:?}"
    );
}
