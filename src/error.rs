//! Operation error taxonomy
//!
//! Network and cache failures are caught at the operation boundary and turned
//! into [`ErrorResult`] payloads instead of surfacing as raw faults.

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::protocol::messages::{ErrorCode, ErrorResult};
use crate::transport::mqtt::MqttError;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Main error type for tool operations
#[derive(Debug, Error)]
pub enum ToolsError {
    #[error("Cannot reach MQTT broker at {endpoint}: {message}")]
    Connection { endpoint: String, message: String },

    #[error("Timed out: {message}")]
    Timeout {
        message: String,
        suggestion: Option<String>,
    },

    #[error("Invalid input: {message}")]
    Validation { message: String },

    #[error("Cache I/O error: {0}")]
    CacheIo(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ToolsError {
    /// Wrap a transport failure with the broker address it was talking to
    pub fn connection<S: Into<String>>(endpoint: S, error: &MqttError) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            message: error.to_string(),
        }
    }

    pub fn timeout<S: Into<String>>(message: S, suggestion: Option<String>) -> Self {
        Self::Timeout {
            message: message.into(),
            suggestion,
        }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ToolsError::Connection { .. } => ErrorCode::ConnectionError,
            ToolsError::Timeout { .. } => ErrorCode::Timeout,
            ToolsError::Validation { .. } => ErrorCode::ValidationError,
            ToolsError::CacheIo(_) => ErrorCode::CacheIoError,
            ToolsError::Config(_) | ToolsError::Internal { .. } => ErrorCode::InternalError,
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            ToolsError::Connection { .. } => Some(
                "Check MQTT_HOST, MQTT_PORT and credentials, then retry once the broker is reachable"
                    .to_string(),
            ),
            ToolsError::Timeout { suggestion, .. } => suggestion.clone(),
            ToolsError::CacheIo(_) => {
                Some("Results are still valid; the topic cache could not be saved".to_string())
            }
            _ => None,
        }
    }

    /// Convert into the structured payload returned to tool callers
    pub fn to_error_result(&self) -> ErrorResult {
        ErrorResult {
            code: self.code(),
            message: sanitize_error_message(&self.to_string()),
            suggestion: self.suggestion(),
        }
    }
}

fn secret_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(password|passwd|token|secret)[=:]\s*\S+").expect("valid secret pattern")
    })
}

fn url_credentials_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(mqtts?|tcp|ssl)://[^/\s:@]+:[^/\s@]+@").expect("valid url pattern")
    })
}

/// Redact credentials and bound the length of messages returned to callers
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = secret_pattern()
        .replace_all(message, "${1}=***")
        .to_string();

    sanitized = url_credentials_pattern()
        .replace_all(&sanitized, "${1}://***@")
        .to_string();

    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let mut cut = 500 - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for tool operations
pub type ToolsResult<T> = Result<T, ToolsError>;
