use motionkit_settings::{Config, SettingsError};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_toml_save_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::new();
    config.scheduler.refresh_interval_ms = 25;
    config.hardware.io_timeout_ms = 1500;
    config.logging.json = true;
    config.save_to_file(&path).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("[scheduler]"));
    assert!(text.contains("refresh_interval_ms = 25"));

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_json_format_supported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, r#"{ "logging": { "level": "debug" } }"#).unwrap();

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded.logging.level, "debug");
    assert_eq!(loaded.simulation.tick_ms, 10);
}

#[test]
fn test_invalid_file_rejected() {
    let dir = tempdir().unwrap();

    let path = dir.path().join("config.toml");
    fs::write(&path, "[hardware]\nio_timeout_ms = 0\n").unwrap();
    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::InvalidSetting { .. })
    ));

    fs::write(&path, "[hardware\n").unwrap();
    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::TomlError(_))
    ));

    let yaml = dir.path().join("config.yaml");
    fs::write(&yaml, "scheduler: {}").unwrap();
    assert!(matches!(
        Config::load_from_file(&yaml),
        Err(SettingsError::UnsupportedFormat(ref ext)) if ext == "yaml"
    ));
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    assert_eq!(Config::load_or_default(&path).unwrap(), Config::default());
    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::IoError(_))
    ));
}
