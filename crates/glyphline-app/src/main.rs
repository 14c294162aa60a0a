//! glyphline console shell: initializes a capture session and pumps it.

use std::process;
use std::time::Duration;

use glyphline_app::{
    app_version, build_controller, capture_enabled_from_env, config_from_env,
    project_runtime_status,
};
use glyphline_core::SessionPhase;
use glyphline_transport::validate_service_endpoint;
use log::info;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = config_from_env();
    if let Err(error) = validate_service_endpoint(&config.service_url) {
        eprintln!("glyphline {}: {error}", app_version());
        process::exit(2);
    }

    if !capture_enabled_from_env() {
        println!(
            "glyphline {}: capture disabled via GLYPHLINE_CAPTURE_ENABLED",
            app_version()
        );
        return;
    }

    let mut controller = build_controller(&config);
    info!(
        "glyphline {} connecting to {}",
        app_version(),
        config.service_url
    );

    controller.initialize();
    let status = project_runtime_status(controller.state());
    if let Some(message) = status.error_message {
        eprintln!("session failed: {message}");
        process::exit(1);
    }

    loop {
        controller.pump(Duration::from_millis(250));

        if controller.state().phase == SessionPhase::Error {
            match controller.state().last_error {
                Some(fault) => eprintln!("session ended: {}", fault.user_message()),
                None => eprintln!("session ended"),
            }
            process::exit(1);
        }
    }
}
