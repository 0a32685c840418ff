//! Point reads: cache first, then a bounded live wait per topic

use super::{flush_cache, observation_from, subscribe_error};
use crate::cache::TopicCache;
use crate::error::ToolsError;
use crate::protocol::messages::{Provenance, ValueOutcome, ValueReport, ValueResult};
use crate::protocol::topics::{discovery_suggestion, validate_topic_name};
use crate::transport::mqtt::qos_to_u8;
use crate::transport::{Broker, BrokerEvent};
use chrono::Utc;
use futures::future::join_all;
use std::time::Duration;
use tracing::{debug, Instrument};

#[derive(Debug, Clone, PartialEq)]
pub struct ValueRequest {
    pub topics: Vec<String>,
    /// Live wait per topic
    pub timeout: Duration,
    /// Cached values older than this are re-read live; `None` never expires them
    pub max_age: Option<Duration>,
}

impl ValueRequest {
    pub fn new(topics: Vec<String>, timeout: Duration) -> Self {
        Self {
            topics,
            timeout,
            max_age: None,
        }
    }
}

/// Resolve every topic independently; results keep request order
pub async fn read_values(
    broker: &dyn Broker,
    cache: &TopicCache,
    request: &ValueRequest,
) -> ValueReport {
    let reads = request
        .topics
        .iter()
        .map(|topic| read_one(broker, cache, topic, request.timeout, request.max_age));
    let values = join_all(reads).await;

    flush_cache(cache).await;
    ValueReport::new(values)
}

async fn read_one(
    broker: &dyn Broker,
    cache: &TopicCache,
    topic: &str,
    timeout: Duration,
    max_age: Option<Duration>,
) -> ValueResult {
    let outcome = match validate_topic_name(topic) {
        Err(e) => error_outcome(ToolsError::validation(format!("{topic:?}: {e}"))),
        Ok(()) => match cached_value(cache, topic, max_age).await {
            Some(outcome) => outcome,
            None => {
                let span = crate::mqtt_span!(operation = "read", topic = %topic);
                wait_live(broker, cache, topic, timeout)
                    .instrument(span)
                    .await
            }
        },
    };

    ValueResult {
        topic: topic.to_string(),
        outcome,
    }
}

/// Cached value if present and fresh enough; payload-less entries are misses
async fn cached_value(
    cache: &TopicCache,
    topic: &str,
    max_age: Option<Duration>,
) -> Option<ValueOutcome> {
    let entry = cache.lookup(topic).await?;
    let value = entry.value.as_ref()?;

    let age_seconds = entry.age_seconds(Utc::now());
    if let Some(max_age) = max_age {
        if age_seconds > max_age.as_secs_f64() {
            debug!(topic, age_seconds, "Cached value is stale, reading live");
            return None;
        }
    }

    Some(ValueOutcome::Resolved {
        value: value.decoded(),
        source: Provenance::Cache,
        age_seconds,
        qos: entry.qos,
        retained: entry.retained,
    })
}

async fn wait_live(
    broker: &dyn Broker,
    cache: &TopicCache,
    topic: &str,
    timeout: Duration,
) -> ValueOutcome {
    let mut subscription = match broker.subscribe(topic).await {
        Ok(subscription) => subscription,
        Err(e) => return error_outcome(subscribe_error(broker, e)),
    };

    let mut connection_lost: Option<String> = None;
    let waited = tokio::time::timeout(timeout, async {
        loop {
            match subscription.next_event().await {
                Some(BrokerEvent::Message(message)) if message.topic == topic => {
                    return Some(message);
                }
                Some(BrokerEvent::Message(_)) => continue,
                Some(BrokerEvent::ConnectionLost(reason)) => connection_lost = Some(reason),
                None => return None,
            }
        }
    })
    .await;
    drop(subscription);

    match waited {
        Ok(Some(message)) => {
            cache.merge(observation_from(&message)).await;
            ValueOutcome::Resolved {
                value: crate::cache::decode_payload(&message.payload),
                source: Provenance::Live,
                age_seconds: 0.0,
                qos: Some(qos_to_u8(message.qos)),
                retained: Some(message.retain),
            }
        }
        Ok(None) => error_outcome(ToolsError::Connection {
            endpoint: broker.endpoint(),
            message: "subscription closed while waiting".to_string(),
        }),
        Err(_) => match connection_lost {
            Some(reason) => error_outcome(ToolsError::Connection {
                endpoint: broker.endpoint(),
                message: format!("connection lost while waiting: {reason}"),
            }),
            None => ValueOutcome::Timeout {
                error: format!(
                    "No message received on '{topic}' within {}s",
                    timeout.as_secs_f64()
                ),
                suggestion: discovery_suggestion(topic),
            },
        },
    }
}

fn error_outcome(error: ToolsError) -> ValueOutcome {
    let result = error.to_error_result();
    ValueOutcome::Error {
        code: result.code,
        error: result.message,
        suggestion: result.suggestion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Observation;
    use crate::protocol::ErrorCode;
    use crate::testing::MockBroker;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Instant;

    fn request(topics: &[&str], timeout_ms: u64) -> ValueRequest {
        ValueRequest::new(
            topics.iter().map(|t| t.to_string()).collect(),
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test]
    async fn test_cached_value_returns_without_subscribing() {
        let broker = MockBroker::new();
        let cache = TopicCache::in_memory();
        cache
            .merge(
                Observation::topic_only("sensors/temp", Utc::now())
                    .with_payload("21.5")
                    .with_metadata(0, true),
            )
            .await;

        let report = read_values(&broker, &cache, &request(&["sensors/temp"], 100)).await;
        let value = &report.values[0];
        assert_eq!(value.source(), Some(Provenance::Cache));
        match &value.outcome {
            ValueOutcome::Resolved { value, retained, .. } => {
                assert_eq!(value, &json!(21.5));
                assert_eq!(*retained, Some(true));
            }
            other => panic!("Expected resolved, got {other:?}"),
        }
        assert_eq!(broker.subscribe_calls(), 0);
    }

    #[tokio::test]
    async fn test_live_read_updates_cache() {
        let broker = MockBroker::new();
        broker.retain("home/door/front", "open").await;
        let cache = TopicCache::in_memory();

        let report = read_values(&broker, &cache, &request(&["home/door/front"], 500)).await;
        assert_eq!(report.resolved, 1);
        assert_eq!(report.values[0].source(), Some(Provenance::Live));

        let entry = cache.lookup("home/door/front").await.unwrap();
        assert_eq!(entry.value.unwrap().raw(), b"open");

        let again = read_values(&broker, &cache, &request(&["home/door/front"], 500)).await;
        assert_eq!(again.values[0].source(), Some(Provenance::Cache));
    }

    #[tokio::test]
    async fn test_topic_known_without_payload_is_read_live() {
        let broker = Arc::new(MockBroker::new());
        let cache = TopicCache::in_memory();
        cache
            .merge(Observation::topic_only("lights/porch", Utc::now()))
            .await;
        broker.inject_after(Duration::from_millis(20), "lights/porch", "on");

        let report = read_values(broker.as_ref(), &cache, &request(&["lights/porch"], 1000)).await;
        assert_eq!(report.values[0].source(), Some(Provenance::Live));
    }

    #[tokio::test]
    async fn test_stale_cache_entry_is_refreshed_when_max_age_set() {
        let broker = MockBroker::new();
        broker.retain("sensors/temp", "22.0").await;
        let cache = TopicCache::in_memory();
        cache
            .merge(
                Observation::topic_only("sensors/temp", Utc::now() - chrono::Duration::hours(2))
                    .with_payload("18.0"),
            )
            .await;

        let mut req = request(&["sensors/temp"], 500);
        req.max_age = Some(Duration::from_secs(60));
        let report = read_values(&broker, &cache, &req).await;
        match &report.values[0].outcome {
            ValueOutcome::Resolved { value, source, .. } => {
                assert_eq!(*source, Provenance::Live);
                assert_eq!(value, &json!(22.0));
            }
            other => panic!("Expected live value, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_carries_discovery_suggestion() {
        let broker = MockBroker::new();
        let cache = TopicCache::in_memory();

        let report = read_values(&broker, &cache, &request(&["zigbee2mqtt/unknown"], 50)).await;
        match &report.values[0].outcome {
            ValueOutcome::Timeout { suggestion, .. } => {
                assert!(suggestion.contains("keywords='zigbee2mqtt'"));
            }
            other => panic!("Expected timeout, got {other:?}"),
        }
        assert_eq!(report.failed, 1);
        assert_eq!(broker.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_slow_topic_does_not_delay_cached_topic() {
        let broker = MockBroker::new();
        let cache = TopicCache::in_memory();
        cache
            .merge(Observation::topic_only("fast", Utc::now()).with_payload("1"))
            .await;

        let started = Instant::now();
        let report = read_values(&broker, &cache, &request(&["slow/a", "fast", "slow/b"], 200)).await;

        let topics: Vec<_> = report.values.iter().map(|v| v.topic.as_str()).collect();
        assert_eq!(topics, vec!["slow/a", "fast", "slow/b"]);
        assert!(report.values[1].is_resolved());
        // Per-topic waits run concurrently
        assert!(started.elapsed() < Duration::from_millis(390));
    }

    #[tokio::test]
    async fn test_wildcard_topic_is_validation_error() {
        let broker = MockBroker::new();
        let cache = TopicCache::in_memory();

        let report = read_values(&broker, &cache, &request(&["home/#", ""], 50)).await;
        for value in &report.values {
            assert!(matches!(
                value.outcome,
                ValueOutcome::Error {
                    code: ErrorCode::ValidationError,
                    ..
                }
            ));
        }
    }

    #[tokio::test]
    async fn test_disconnected_broker_reports_connection_error() {
        let broker = MockBroker::disconnected();
        let cache = TopicCache::in_memory();

        let report = read_values(&broker, &cache, &request(&["home/door"], 50)).await;
        match &report.values[0].outcome {
            ValueOutcome::Error { code, error, .. } => {
                assert_eq!(*code, ErrorCode::ConnectionError);
                assert!(error.contains("mock-broker:1883"));
            }
            other => panic!("Expected connection error, got {other:?}"),
        }
    }
}
