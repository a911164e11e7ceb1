//! Configuration loading and graceful degradation
//!
//! Tests touching YAYTSA_DATA_DIR are marked #[serial] so they never race on
//! the process environment.

use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::PathBuf;
use yaytsa_common::config::{
    default_data_folder, ensure_data_folder, resolve_data_folder, TomlConfig, DATA_DIR_ENV,
};

#[test]
fn test_defaults() {
    let config = TomlConfig::default();
    assert_eq!(config.log_level, "info");
    assert_eq!(config.sample_rate, 44_100);
    assert_eq!(config.crossfade_ms, 150);
    assert_eq!(config.time_update_interval_ms, 250);
    assert!(config.audio_device.is_none());
    assert!(config.data_folder.is_none());
}

#[test]
fn test_partial_toml_keeps_other_defaults() {
    let config = TomlConfig::from_toml_str(
        r#"
        log_level = "debug"
        audio_device = "USB DAC"
        "#,
    )
    .unwrap();

    assert_eq!(config.log_level, "debug");
    assert_eq!(config.audio_device.as_deref(), Some("USB DAC"));
    assert_eq!(config.sample_rate, 44_100);
    assert_eq!(config.crossfade_ms, 150);
}

#[test]
fn test_malformed_toml_is_an_error() {
    let result = TomlConfig::from_toml_str("sample_rate = \"fast\"");
    assert!(result.is_err());
}

#[test]
fn test_load_or_default_with_malformed_file_falls_back() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "this is [not toml").unwrap();

    let config = TomlConfig::load_or_default(Some(file.path()));
    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_load_or_default_with_missing_file_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    let config = TomlConfig::load_or_default(Some(&missing));
    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_load_explicit_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "data_folder = \"/srv/yaytsa\"\nbuffer_size = 512").unwrap();

    let config = TomlConfig::load_or_default(Some(file.path()));
    assert_eq!(config.data_folder, Some(PathBuf::from("/srv/yaytsa")));
    assert_eq!(config.buffer_size, Some(512));
}

#[test]
#[serial]
fn test_cli_takes_precedence() {
    env::set_var(DATA_DIR_ENV, "/tmp/yaytsa-env");
    let toml = TomlConfig {
        data_folder: Some(PathBuf::from("/tmp/yaytsa-toml")),
        ..TomlConfig::default()
    };

    let cli = PathBuf::from("/tmp/yaytsa-cli");
    assert_eq!(resolve_data_folder(Some(&cli), &toml), cli);

    env::remove_var(DATA_DIR_ENV);
}

#[test]
#[serial]
fn test_env_beats_toml() {
    env::set_var(DATA_DIR_ENV, "/tmp/yaytsa-env");
    let toml = TomlConfig {
        data_folder: Some(PathBuf::from("/tmp/yaytsa-toml")),
        ..TomlConfig::default()
    };

    assert_eq!(
        resolve_data_folder(None, &toml),
        PathBuf::from("/tmp/yaytsa-env")
    );

    env::remove_var(DATA_DIR_ENV);
}

#[test]
#[serial]
fn test_toml_beats_default() {
    env::remove_var(DATA_DIR_ENV);
    let toml = TomlConfig {
        data_folder: Some(PathBuf::from("/tmp/yaytsa-toml")),
        ..TomlConfig::default()
    };

    assert_eq!(
        resolve_data_folder(None, &toml),
        PathBuf::from("/tmp/yaytsa-toml")
    );
}

#[test]
#[serial]
fn test_no_overrides_uses_platform_default() {
    env::remove_var(DATA_DIR_ENV);

    let folder = resolve_data_folder(None, &TomlConfig::default());
    assert_eq!(folder, default_data_folder());
    assert!(folder.to_string_lossy().contains("yaytsa"));
}

#[test]
fn test_ensure_data_folder_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("level1").join("level2");

    ensure_data_folder(&nested).unwrap();
    ensure_data_folder(&nested).unwrap();

    assert!(nested.is_dir());
}
