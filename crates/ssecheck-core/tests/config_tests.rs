use std::io::Write;
use std::time::Duration;

use ssecheck_core::config::{ConfigError, DEFAULT_POLL_INTERVAL_MS, DEFAULT_STARTUP_TIMEOUT_MS};
use ssecheck_core::{DebugOutputPolicy, HarnessConfig};

#[test]
fn test_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[service]
url = "http://localhost:8000"
startup_timeout_ms = 2500

[timeouts]
await_connection_ms = 750

[reporting]
debug_output = "always"
"#
    )
    .unwrap();

    let config = HarnessConfig::from_file(file.path()).unwrap();
    assert_eq!(config.service.url, "http://localhost:8000");
    assert_eq!(config.service.startup_timeout(), Duration::from_millis(2500));
    assert_eq!(
        config.service.poll_interval(),
        Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
    );
    assert_eq!(config.timeouts.await_connection(), Duration::from_millis(750));
    assert_eq!(config.reporting.debug_output, DebugOutputPolicy::Always);
    assert!(config.validate().is_ok());
}

#[test]
fn test_from_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = HarnessConfig::from_file(dir.path().join("nope.toml"));
    assert!(matches!(result, Err(ConfigError::ReadError(_))));
}

#[test]
fn test_from_malformed_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[service\nurl = ").unwrap();
    let result = HarnessConfig::from_file(file.path());
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}

#[test]
fn test_default_config_round_trips() {
    let text = HarnessConfig::default_config_string();
    let config: HarnessConfig = toml::from_str(&text).unwrap();
    assert_eq!(config.service.startup_timeout_ms, DEFAULT_STARTUP_TIMEOUT_MS);
}

#[test]
fn test_validate_rejects_relative_url() {
    let mut config = HarnessConfig::default();
    config.service.url = "localhost:8000/path".to_string();
    assert!(config.validate().is_err());
}
