//! Cache records and their on-disk form

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Raw payload bytes with a display-friendly decoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredPayload", into = "StoredPayload")]
pub struct PayloadValue {
    raw: Vec<u8>,
}

/// UTF-8 payloads stay readable in the cache file
#[derive(Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "lowercase")]
enum StoredPayload {
    Utf8(String),
    Bytes(Vec<u8>),
}

impl From<StoredPayload> for PayloadValue {
    fn from(stored: StoredPayload) -> Self {
        match stored {
            StoredPayload::Utf8(text) => Self::new(text.into_bytes()),
            StoredPayload::Bytes(raw) => Self::new(raw),
        }
    }
}

impl From<PayloadValue> for StoredPayload {
    fn from(value: PayloadValue) -> Self {
        match String::from_utf8(value.raw) {
            Ok(text) => StoredPayload::Utf8(text),
            Err(e) => StoredPayload::Bytes(e.into_bytes()),
        }
    }
}

impl PayloadValue {
    pub fn new(raw: impl Into<Vec<u8>>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// JSON when the payload parses as JSON, the text otherwise
    pub fn decoded(&self) -> Value {
        decode_payload(&self.raw)
    }
}

/// Best-effort decoding of a wire payload for display
pub fn decode_payload(raw: &[u8]) -> Value {
    match std::str::from_utf8(raw) {
        Ok(text) => serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
        Err(_) => Value::String(String::from_utf8_lossy(raw).into_owned()),
    }
}

/// Last known state of one topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicEntry {
    pub topic: String,
    /// `None` when the topic was seen without a payload being kept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<PayloadValue>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qos: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retained: Option<bool>,
}

impl TopicEntry {
    pub fn from_observation(observation: Observation) -> Self {
        Self {
            topic: observation.topic,
            value: observation.payload.map(PayloadValue::new),
            first_seen: observation.observed_at,
            last_seen: observation.observed_at,
            qos: observation.qos,
            retained: observation.retained,
        }
    }

    /// Seconds since the entry was last refreshed, never negative
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.last_seen).num_milliseconds().max(0);
        millis as f64 / 1000.0
    }
}

/// One sighting of a topic, submitted to [`TopicCache::merge`](super::TopicCache::merge)
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub topic: String,
    pub payload: Option<Vec<u8>>,
    pub qos: Option<u8>,
    pub retained: Option<bool>,
    pub observed_at: DateTime<Utc>,
}

impl Observation {
    /// Topic seen without keeping its payload
    pub fn topic_only(topic: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            topic: topic.into(),
            payload: None,
            qos: None,
            retained: None,
            observed_at,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_metadata(mut self, qos: u8, retained: bool) -> Self {
        self.qos = Some(qos);
        self.retained = Some(retained);
        self
    }
}

/// The whole cache as persisted to disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub topics: Vec<TopicEntry>,
}

impl CacheSnapshot {
    pub fn new(topics: Vec<TopicEntry>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            topics,
        }
    }
}

/// What a merge did to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    /// Observation older than what the cache already holds
    Stale,
}

/// One page of a cache query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    pub entries: Vec<TopicEntry>,
    /// Matches before pagination
    pub total: usize,
}
