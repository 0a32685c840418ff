//! Structured result types returned by the four tools
//!
//! Everything here is serialized to JSON for the tool front-end. None of it is
//! persisted; the durable topic state lives in [`crate::cache`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Where a value came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Served from the topic cache without waiting on the broker
    Cache,
    /// Received from the broker during this call
    Live,
}

/// One topic in a discovery page
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicSummary {
    pub topic: String,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qos: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retained: Option<bool>,
    /// Decoded last payload, only when values were requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Result of the `topics` tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanResult {
    pub matches: Vec<TopicSummary>,
    /// Matches across all pages
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
    /// Distinct topics seen on the wire during this scan
    pub observed: usize,
    /// Topics that were not in the cache before this scan
    pub new_topics: usize,
    /// The broker connection dropped during the scan window
    pub degraded: bool,
    pub duration_secs: f64,
}

/// Per-topic result of the `value` tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValueResult {
    pub topic: String,
    #[serde(flatten)]
    pub outcome: ValueOutcome,
}

impl ValueResult {
    pub fn is_resolved(&self) -> bool {
        matches!(self.outcome, ValueOutcome::Resolved { .. })
    }

    pub fn source(&self) -> Option<Provenance> {
        match &self.outcome {
            ValueOutcome::Resolved { source, .. } => Some(*source),
            _ => None,
        }
    }
}

/// Outcome of reading one topic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValueOutcome {
    Resolved {
        value: Value,
        source: Provenance,
        age_seconds: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        qos: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        retained: Option<bool>,
    },
    /// Nothing arrived within the per-topic timeout
    Timeout { error: String, suggestion: String },
    Error {
        code: ErrorCode,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        suggestion: Option<String>,
    },
}

/// Result of the `value` tool, in request order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValueReport {
    pub values: Vec<ValueResult>,
    pub resolved: usize,
    pub failed: usize,
}

impl ValueReport {
    pub fn new(values: Vec<ValueResult>) -> Self {
        let resolved = values.iter().filter(|v| v.is_resolved()).count();
        let failed = values.len() - resolved;
        Self {
            values,
            resolved,
            failed,
        }
    }
}

/// Per-message result of the `publish` tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishOutcome {
    /// Position of the message in the request
    pub index: usize,
    pub topic: String,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

impl PublishOutcome {
    pub fn accepted(index: usize, topic: impl Into<String>) -> Self {
        Self {
            index,
            topic: topic.into(),
            accepted: true,
            error: None,
        }
    }

    pub fn rejected(
        index: usize,
        topic: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            index,
            topic: topic.into(),
            accepted: false,
            error: Some(ErrorDetails {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Result of the `publish` tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishReport {
    pub outcomes: Vec<PublishOutcome>,
    pub accepted: usize,
    pub rejected: usize,
}

impl PublishReport {
    pub fn new(outcomes: Vec<PublishOutcome>) -> Self {
        let accepted = outcomes.iter().filter(|o| o.accepted).count();
        let rejected = outcomes.len() - accepted;
        Self {
            outcomes,
            accepted,
            rejected,
        }
    }
}

/// Whether a recorded event is the first for its topic in the recording
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    New,
    Updated,
}

/// One message captured by the `record` tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedEvent {
    /// Seconds since the recording started
    pub offset_secs: f64,
    pub timestamp: DateTime<Utc>,
    pub topic: String,
    pub payload: Value,
    pub qos: u8,
    pub retained: bool,
    pub change_type: ChangeType,
    /// Difference from this topic's previous payload in the same recording
    pub changes: Value,
}

/// Filters a recording was started with
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
}

/// Result of the `record` tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordResult {
    pub duration_secs: f64,
    pub filter: Option<RecordFilter>,
    pub events: Vec<RecordedEvent>,
    pub unique_topics: usize,
    pub total_events: usize,
    pub ignored_events: usize,
    pub degraded: bool,
}

/// Error codes surfaced to tool callers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ConnectionError,
    Timeout,
    ValidationError,
    CacheIoError,
    InternalError,
}

/// Code plus human-readable description
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    /// Human-readable description (no credentials)
    pub message: String,
}

/// Structured error returned in place of a result
///
/// # Examples
/// ```
/// use mqtt_tools::protocol::{ErrorCode, ErrorResult};
///
/// let error = ErrorResult {
///     code: ErrorCode::ConnectionError,
///     message: "Cannot reach MQTT broker at localhost:1883".to_string(),
///     suggestion: None,
/// };
/// let json = serde_json::to_string(&error).unwrap();
/// assert!(json.contains("\"connection_error\""));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResult {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Seconds rounded to milliseconds for display
pub fn rounded_secs(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 1000.0).round() / 1000.0
}
