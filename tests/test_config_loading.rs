//! Configuration loading and validation tests
//!
//! Tests focus on observable outcomes of loading TOML files: defaults,
//! section parsing and validation errors.

use mqtt_tools::config::{ConfigError, ToolsConfig};
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
[broker]
host = "broker.local"
port = 1884
username = "homeassistant"
client_id_prefix = "ha-tools"
keep_alive_secs = 30

[cache]
path = "/tmp/mqtt-tools-test/topics.json"
max_age_secs = 600

[record]
ignored_prefixes = ["tasmota/discovery/"]
"#,
    );

    let config = ToolsConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.broker.host, "broker.local");
    assert_eq!(config.broker.port, 1884);
    assert_eq!(config.broker.username.as_deref(), Some("homeassistant"));
    assert_eq!(config.broker.client_id_prefix, "ha-tools");
    assert_eq!(config.broker.keep_alive_secs, 30);
    assert_eq!(
        config.cache.path,
        PathBuf::from("/tmp/mqtt-tools-test/topics.json")
    );
    assert_eq!(config.cache.max_age_secs, Some(600));
    assert_eq!(config.record.ignored_prefixes, vec!["tasmota/discovery/"]);
}

#[test]
fn test_config_loads_with_missing_sections() {
    let temp_file = write_config(
        r#"
[broker]
host = "10.0.0.5"
"#,
    );

    let config = ToolsConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.broker.host, "10.0.0.5");
    assert_eq!(config.broker.port, 1883);
    assert!(config.broker.username.is_none());
    assert!(!config.broker.tls);
    assert!(config.cache.max_age_secs.is_none());
    assert!(config
        .record
        .ignored_prefixes
        .contains(&"zigbee2mqtt/bridge/".to_string()));
}

#[test]
fn test_config_fails_with_invalid_toml_syntax() {
    let temp_file = write_config(
        r#"
[broker
host = "broken"
"#,
    );

    let result = ToolsConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_fails_with_wrong_field_type() {
    let temp_file = write_config(
        r#"
[broker]
port = "not-a-number"
"#,
    );

    let result = ToolsConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_fails_validation_with_zero_port() {
    let temp_file = write_config(
        r#"
[broker]
port = 0
"#,
    );

    let result = ToolsConfig::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::InvalidPort(_))));
}

#[test]
fn test_config_fails_with_missing_file() {
    let result = ToolsConfig::load_from_file(std::path::Path::new(
        "/nonexistent/mqtt-tools/config.toml",
    ));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_password_from_file_is_not_written_back() {
    let temp_file = write_config(
        r#"
[broker]
username = "user"
password = "hunter2"
"#,
    );

    let config = ToolsConfig::load_from_file(temp_file.path()).unwrap();
    assert_eq!(config.broker.password.as_deref(), Some("hunter2"));

    let shown = toml::to_string_pretty(&config).unwrap();
    assert!(!shown.contains("hunter2"));
    assert!(shown.contains("user"));
}
