// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use gst_capture_ring::constants::{ring, timing};
use gst_capture_ring::{CaptureError, Config, SourceType};
use std::path::PathBuf;

fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("gst-capture-ring-test-{}", std::process::id()))
        .join(name)
}

#[test]
fn test_config_default() {
    let config = Config::default();

    assert_eq!(config.width, ring::DEFAULT_WIDTH);
    assert_eq!(config.height, ring::DEFAULT_HEIGHT);
    assert_eq!(config.ring_buffers, 16, "Reference ring depth is 16 slots");
    assert_eq!(config.acquire_timeout_ms, timing::DEFAULT_ACQUIRE_TIMEOUT_MS);
    assert_eq!(config.source, SourceType::Onboard);
    assert!(!config.zero_copy, "Zero-copy must be opted into");
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_save_and_load() {
    let path = scratch_path("roundtrip/config.json");
    let config = Config {
        width: 640,
        height: 480,
        source: SourceType::External { device: 2 },
        zero_copy: true,
        ..Config::default()
    };

    config.save(&path).unwrap();
    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded, config);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_missing_file_uses_defaults() {
    let path = scratch_path("does-not-exist.json");
    let config = Config::load_or_default(Some(path.as_path())).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_invalid_file_is_config_error() {
    let path = scratch_path("invalid/config.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{ not json").unwrap();

    assert!(matches!(
        Config::load_or_default(Some(path.as_path())),
        Err(CaptureError::Config(_))
    ));

    std::fs::write(&path, r#"{"width": 0}"#).unwrap();
    assert!(matches!(Config::load(&path), Err(CaptureError::Config(_))));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_default_path_location() {
    if let Some(path) = Config::default_path() {
        assert!(path.ends_with("gst-capture-ring/config.json"));
    }
}
