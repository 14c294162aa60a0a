//! Integration tests for settings merge, propagation, and persistence.

mod common;

use common::{MemoryConnector, RecordingStore, ScriptedProvider, controller_with};
use glyphline_core::{CropRegion, ImageFormat, SettingsPatch};

#[test]
fn settings_update_tests_patch_merges_and_persists() {
    let provider = ScriptedProvider::granting(32, 24);
    let connector = MemoryConnector::acking();
    let store = RecordingStore::new();
    let mut controller = controller_with(&provider, &connector, &store, None);

    controller
        .update_capture_settings(&SettingsPatch {
            quality: Some(0.5),
            ..SettingsPatch::default()
        })
        .expect("settings update should succeed");

    assert_eq!(controller.settings().quality, 0.5);
    assert_eq!(controller.settings().format, ImageFormat::Jpeg);

    let saves = store.saves();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].quality, 0.5);
}

#[test]
fn settings_update_tests_invalid_patch_is_rejected_whole() {
    let provider = ScriptedProvider::granting(32, 24);
    let connector = MemoryConnector::acking();
    let store = RecordingStore::new();
    let mut controller = controller_with(&provider, &connector, &store, None);

    let result = controller.update_capture_settings(&SettingsPatch {
        quality: Some(1.5),
        ..SettingsPatch::default()
    });

    assert!(result.is_err());
    assert_eq!(controller.settings().quality, 0.9, "settings untouched");
    assert!(store.saves().is_empty(), "nothing invalid gets persisted");
}

#[test]
fn settings_update_tests_crop_propagates_to_the_capture_service() {
    let provider = ScriptedProvider::granting(32, 24);
    let connector = MemoryConnector::acking();
    let store = RecordingStore::new();
    let mut controller = controller_with(&provider, &connector, &store, None);
    controller.initialize();

    controller
        .update_capture_settings(&SettingsPatch {
            format: Some(ImageFormat::Png),
            crop_region: Some(CropRegion {
                x: 1,
                y: 1,
                width: 6,
                height: 4,
            }),
            ..SettingsPatch::default()
        })
        .expect("settings update should succeed");

    let captured = controller
        .capture_now(true)
        .expect("manual capture should succeed");
    let decoded = image::load_from_memory(&captured.bytes).expect("capture should decode");
    assert_eq!((decoded.width(), decoded.height()), (6, 4));
}

#[test]
fn settings_update_tests_stored_patch_is_loaded_at_construction() {
    let provider = ScriptedProvider::granting(32, 24);
    let connector = MemoryConnector::acking();
    let store = RecordingStore::preloaded(SettingsPatch {
        format: Some(ImageFormat::Webp),
        interval_seconds: Some(2.5),
        ..SettingsPatch::default()
    });
    let controller = controller_with(&provider, &connector, &store, None);

    assert_eq!(controller.settings().format, ImageFormat::Webp);
    assert_eq!(controller.settings().interval_seconds, 2.5);
    assert_eq!(controller.settings().quality, 0.9, "defaults fill the rest");
}

#[test]
fn settings_update_tests_clear_crop_region_round_trips() {
    let provider = ScriptedProvider::granting(32, 24);
    let connector = MemoryConnector::acking();
    let store = RecordingStore::new();
    let mut controller = controller_with(&provider, &connector, &store, None);

    controller
        .update_capture_settings(&SettingsPatch {
            crop_region: Some(CropRegion {
                x: 0,
                y: 0,
                width: 4,
                height: 4,
            }),
            ..SettingsPatch::default()
        })
        .expect("crop set should succeed");
    assert!(controller.settings().crop_region.is_some());

    controller
        .update_capture_settings(&SettingsPatch {
            clear_crop_region: true,
            ..SettingsPatch::default()
        })
        .expect("crop clear should succeed");
    assert!(controller.settings().crop_region.is_none());
}
