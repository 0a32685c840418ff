//! Configuration for the MQTT tool server
//!
//! Settings come from an optional TOML file and are then overridden by
//! environment variables. Every section has defaults so an empty file (or no
//! file at all) yields a working anonymous connection to `localhost:1883`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolsConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub record: RecordSection,
}

/// Broker section - where and how to connect
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Absent username means anonymous connection
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub tls: bool,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// How long startup waits for the first ConnAck before continuing without one
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_client_id_prefix() -> String {
    "mqtt-tools".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            tls: false,
            client_id_prefix: default_client_id_prefix(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl BrokerSection {
    /// `host:port`, used in connection error details
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Apply an `mqtt://` or `mqtts://` broker URL, including any credentials in it
    pub fn apply_url(&mut self, broker_url: &str) -> Result<(), ConfigError> {
        let url = Url::parse(broker_url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

        let tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            _ => return Err(ConfigError::InvalidBrokerUrl(broker_url.to_string())),
        };
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

        self.host = host.to_string();
        self.tls = tls;
        self.port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

        if !url.username().is_empty() {
            self.username = Some(url.username().to_string());
            self.password = url.password().map(str::to_string);
        }
        Ok(())
    }
}

/// Cache section - persisted topic snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSection {
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// Cached values older than this are re-read live (None = never expire)
    pub max_age_secs: Option<u64>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            max_age_secs: None,
        }
    }
}

fn default_cache_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home)
            .join(".cache")
            .join("mqtt-tools")
            .join("topics.json"),
        None => PathBuf::from("mqtt-tools-cache.json"),
    }
}

/// Record section - recorder filtering defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordSection {
    /// Topic prefixes skipped by catch-all recordings (bridge chatter, discovery configs)
    #[serde(default = "default_ignored_prefixes")]
    pub ignored_prefixes: Vec<String>,
}

impl Default for RecordSection {
    fn default() -> Self {
        Self {
            ignored_prefixes: default_ignored_prefixes(),
        }
    }
}

fn default_ignored_prefixes() -> Vec<String> {
    vec![
        "zigbee2mqtt/bridge/".to_string(),
        "homeassistant/".to_string(),
    ]
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid port value: {0}")]
    InvalidPort(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ToolsConfig {
    /// Load configuration from TOML file, then apply environment overrides
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: ToolsConfig = toml::from_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = ToolsConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MQTT_*` environment variables on top of the current values
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Override resolution with an injectable lookup so tests never touch the process env
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("MQTT_BROKER_URL") {
            self.broker.apply_url(&url)?;
        }
        if let Some(host) = lookup("MQTT_HOST") {
            self.broker.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.broker.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidPort(port.clone()))?;
        }
        if let Some(tls) = lookup("MQTT_TLS") {
            self.broker.tls = matches!(tls.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(username) = lookup("MQTT_USERNAME").filter(|u| !u.is_empty()) {
            self.broker.username = Some(username);
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            self.broker.password = Some(password);
        }
        if let Some(path) = lookup("MQTT_TOOLS_CACHE") {
            self.cache.path = PathBuf::from(path);
        }
        Ok(())
    }

    /// Check values serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.host must not be empty".to_string(),
            ));
        }
        if self.broker.port == 0 {
            return Err(ConfigError::InvalidPort("0".to_string()));
        }
        if self.broker.client_id_prefix.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.client_id_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
