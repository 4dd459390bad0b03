//! Configuration loading integration tests
//!
//! Exercises `Config::load` against real files.

use std::io::Write;

use lamco_x11_screen::config::Config;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn test_load_full_config() {
    let file = write_config(
        r#"
[display]
name = ":2"
fallback = ":1.0"

[event_loop]
wait_strategy = "sleep"
sleep_interval_ms = 25

[clipboard]
conversion_timeout_ms = 500
chunk_size = 8192

[screensaver]
notify = false

[monitor]
heartbeat_interval_ms = 1000

[logging]
level = "debug"
"#,
    );

    let config = Config::load(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.display.name.as_deref(), Some(":2"));
    assert_eq!(config.display.fallback, ":1.0");
    assert_eq!(config.event_loop.wait_strategy, "sleep");
    assert_eq!(config.event_loop.sleep_interval_ms, 25);
    assert_eq!(config.clipboard.chunk_size, 8192);
    assert!(!config.screensaver.notify);
    assert_eq!(config.monitor.heartbeat_interval_ms, 1000);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.resolve_display(), ":2");
}

#[test]
fn test_load_empty_file_gives_defaults() {
    let file = write_config("");
    let config = Config::load(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.display.fallback, ":0.0");
    assert_eq!(config.event_loop.wait_strategy, "auto");
    assert_eq!(config.clipboard.conversion_timeout_ms, 1000);
}

#[test]
fn test_load_rejects_invalid_values() {
    let file = write_config("[event_loop]\nwait_strategy = \"spin\"\n");
    let err = Config::load(file.path().to_str().unwrap()).unwrap_err();
    assert!(err.to_string().contains("wait strategy"));

    let file = write_config("[clipboard]\nconversion_timeout_ms = 0\n");
    assert!(Config::load(file.path().to_str().unwrap()).is_err());
}

#[test]
fn test_load_rejects_bad_toml() {
    let file = write_config("[display\nname = ");
    let err = Config::load(file.path().to_str().unwrap()).unwrap_err();
    assert!(format!("{:#}", err).contains("parse"));
}

#[test]
fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = Config::load(path.to_str().unwrap()).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
