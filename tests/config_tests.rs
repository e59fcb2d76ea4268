// SPDX-License-Identifier: MPL-2.0

//! Integration tests for configuration module

use frame_provider::config::ProviderConfig;
use frame_provider::media::VideoSubtype;
use frame_provider::{IlluminationMode, ProviderError};
use std::path::PathBuf;
use std::time::Duration;

fn temp_config(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "frame-provider-{}-{}.json",
        name,
        std::process::id()
    ));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_config_default() {
    let config = ProviderConfig::default();

    assert_eq!(config.required_subtype, VideoSubtype::Yuy2);
    assert_eq!(config.stop_wait(), Duration::from_millis(100));
    assert_eq!(config.illumination, IlluminationMode::Alternating);
    assert!(config.buffer_count > 0);
}

#[test]
fn test_partial_file_keeps_defaults() {
    let path = temp_config("partial", r#"{ "stop_wait_ms": 250, "illumination": "AlwaysOn" }"#);
    let config = ProviderConfig::load(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(config.stop_wait(), Duration::from_millis(250));
    assert_eq!(config.illumination, IlluminationMode::AlwaysOn);
    assert_eq!(config.required_subtype, VideoSubtype::Yuy2);
    assert_eq!(config.device_kind, "infrared");
}

#[test]
fn test_zero_buffers_rejected() {
    let path = temp_config("zero-buffers", r#"{ "buffer_count": 0 }"#);
    let result = ProviderConfig::load(&path);
    std::fs::remove_file(&path).ok();

    assert!(matches!(result, Err(ProviderError::Config(_))));
}

#[test]
fn test_malformed_file_is_config_error() {
    let path = temp_config("malformed", "{ not json");
    let result = ProviderConfig::load(&path);
    std::fs::remove_file(&path).ok();

    assert!(matches!(result, Err(ProviderError::Config(_))));
}

#[test]
fn test_missing_explicit_file_is_error() {
    let path = std::env::temp_dir().join("frame-provider-does-not-exist.json");
    assert!(ProviderConfig::load_or_default(Some(&path)).is_err());
}

#[test]
fn test_round_trip_through_json() {
    let config = ProviderConfig {
        required_subtype: VideoSubtype::Nv12,
        read_timeout_ms: 42,
        ..ProviderConfig::default()
    };
    let text = serde_json::to_string(&config).unwrap();
    let parsed: ProviderConfig = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, config);
}
