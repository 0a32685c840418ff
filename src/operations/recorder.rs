//! Time-bounded recording of every matching message, in arrival order

use super::{flush_cache, observation_from, subscribe_error};
use crate::cache::{decode_payload, TopicCache};
use crate::error::{ToolsError, ToolsResult};
use crate::protocol::messages::{
    rounded_secs, ChangeType, RecordFilter, RecordResult, RecordedEvent,
};
use crate::protocol::topics::{
    is_ignored_topic, matches_keywords, topic_matches_filter, validate_topic_filter,
    CATCH_ALL_FILTER,
};
use crate::transport::mqtt::qos_to_u8;
use crate::transport::{Broker, BrokerEvent};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{info, warn, Instrument};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordRequest {
    pub timeout: Duration,
    /// Topic filters; empty records everything
    pub topics: Vec<String>,
    /// OR-combined substrings, ANDed with `topics`
    pub keywords: Vec<String>,
    /// Skipped during catch-all recordings
    pub ignored_prefixes: Vec<String>,
}

impl Default for RecordRequest {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            topics: Vec::new(),
            keywords: Vec::new(),
            ignored_prefixes: Vec::new(),
        }
    }
}

/// Per-key difference between two payloads
///
/// Objects are compared key by key as `{key: {old, new}}`; anything else
/// yields `{old, new}` when the values differ. Equal payloads give `{}`.
pub fn payload_changes(old: &Value, new: &Value) -> Value {
    let mut changes = Map::new();

    match (old, new) {
        (Value::Object(old_fields), Value::Object(new_fields)) => {
            let keys: HashSet<&String> = old_fields.keys().chain(new_fields.keys()).collect();
            for key in keys {
                let old_value = old_fields.get(key).unwrap_or(&Value::Null);
                let new_value = new_fields.get(key).unwrap_or(&Value::Null);
                if old_value != new_value {
                    let mut diff = Map::new();
                    diff.insert("old".to_string(), old_value.clone());
                    diff.insert("new".to_string(), new_value.clone());
                    changes.insert(key.clone(), Value::Object(diff));
                }
            }
        }
        _ if old != new => {
            changes.insert("old".to_string(), old.clone());
            changes.insert("new".to_string(), new.clone());
        }
        _ => {}
    }

    Value::Object(changes)
}

/// Record for the full window and return every matching event
pub async fn record(
    broker: &dyn Broker,
    cache: &TopicCache,
    request: &RecordRequest,
) -> ToolsResult<RecordResult> {
    for filter in &request.topics {
        validate_topic_filter(filter)
            .map_err(|e| ToolsError::validation(format!("topic filter {filter:?}: {e}")))?;
    }

    let catch_all = request.topics.is_empty();
    let filters = if catch_all {
        vec![CATCH_ALL_FILTER.to_string()]
    } else {
        request.topics.clone()
    };

    let started = Instant::now();
    let span = crate::mqtt_span!(
        operation = "record",
        filters = ?filters,
        timeout_secs = request.timeout.as_secs_f64()
    );

    let (events, ignored_events, degraded) = async {
        let mut subscription = broker
            .subscribe_filters(&filters)
            .await
            .map_err(|e| subscribe_error(broker, e))?;

        let mut events: Vec<RecordedEvent> = Vec::new();
        let mut last_payloads: HashMap<String, Value> = HashMap::new();
        let mut ignored_events = 0usize;
        let mut degraded = false;

        let deadline = tokio::time::sleep(request.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = subscription.next_event() => match event {
                    Some(BrokerEvent::Message(message)) => {
                        if catch_all && is_ignored_topic(&message.topic, &request.ignored_prefixes) {
                            ignored_events += 1;
                            continue;
                        }
                        if !filters.iter().any(|f| topic_matches_filter(&message.topic, f)) {
                            continue;
                        }

                        cache.merge(observation_from(&message)).await;

                        if !matches_keywords(&message.topic, &request.keywords) {
                            continue;
                        }

                        let payload = decode_payload(&message.payload);
                        let (change_type, changes) = match last_payloads.get(&message.topic) {
                            None => (ChangeType::New, payload.clone()),
                            Some(previous) => (ChangeType::Updated, payload_changes(previous, &payload)),
                        };
                        last_payloads.insert(message.topic.clone(), payload.clone());

                        events.push(RecordedEvent {
                            offset_secs: rounded_secs(started.elapsed()),
                            timestamp: message.received_at,
                            topic: message.topic.clone(),
                            payload,
                            qos: qos_to_u8(message.qos),
                            retained: message.retain,
                            change_type,
                            changes,
                        });
                    }
                    Some(BrokerEvent::ConnectionLost(reason)) => {
                        warn!("Connection lost during recording, events may be missing: {}", reason);
                        degraded = true;
                    }
                    None => {
                        degraded = true;
                        break;
                    }
                }
            }
        }

        broker
            .unsubscribe(subscription)
            .await
            .map_err(|e| subscribe_error(broker, e))?;
        Ok::<_, ToolsError>((events, ignored_events, degraded))
    }
    .instrument(span)
    .await?;

    flush_cache(cache).await;

    let unique_topics = events
        .iter()
        .map(|event| event.topic.as_str())
        .collect::<HashSet<_>>()
        .len();

    let filter = if request.topics.is_empty() && request.keywords.is_empty() {
        None
    } else {
        Some(RecordFilter {
            topics: (!request.topics.is_empty()).then(|| request.topics.clone()),
            keywords: (!request.keywords.is_empty()).then(|| request.keywords.clone()),
        })
    };

    info!(
        events = events.len(),
        unique_topics, ignored_events, degraded, "Recording complete"
    );

    Ok(RecordResult {
        duration_secs: rounded_secs(started.elapsed()),
        filter,
        total_events: events.len(),
        events,
        unique_topics,
        ignored_events,
        degraded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;
    use crate::testing::MockBroker;
    use serde_json::json;
    use std::sync::Arc;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn request(topics: &[&str], keywords: &[&str]) -> RecordRequest {
        RecordRequest {
            timeout: Duration::from_millis(200),
            topics: strings(topics),
            keywords: strings(keywords),
            ignored_prefixes: strings(&["zigbee2mqtt/bridge/"]),
        }
    }

    #[test]
    fn test_payload_changes_objects() {
        let changes = payload_changes(
            &json!({"state": "OFF", "brightness": 100, "linkquality": 80}),
            &json!({"state": "ON", "brightness": 100, "color": "red"}),
        );
        assert_eq!(
            changes,
            json!({
                "state": {"old": "OFF", "new": "ON"},
                "linkquality": {"old": 80, "new": null},
                "color": {"old": null, "new": "red"}
            })
        );
    }

    #[test]
    fn test_payload_changes_scalars() {
        assert_eq!(
            payload_changes(&json!("open"), &json!("closed")),
            json!({"old": "open", "new": "closed"})
        );
        assert_eq!(payload_changes(&json!(1), &json!(1)), json!({}));
        assert_eq!(
            payload_changes(&json!({"a": 1}), &json!("text")),
            json!({"old": {"a": 1}, "new": "text"})
        );
    }

    #[tokio::test]
    async fn test_keyword_filter_records_matching_topic_only() {
        let broker = Arc::new(MockBroker::new());
        let cache = TopicCache::in_memory();
        broker.inject_after(Duration::from_millis(20), "home/door/front", "open");
        broker.inject_after(Duration::from_millis(30), "home/window/side", "closed");

        let result = record(broker.as_ref(), &cache, &request(&[], &["door"]))
            .await
            .unwrap();

        assert_eq!(result.total_events, 1);
        assert_eq!(result.events[0].topic, "home/door/front");
        assert_eq!(result.events[0].payload, json!("open"));
        assert_eq!(result.events[0].change_type, ChangeType::New);
        // Everything observed still reaches the cache
        assert!(cache.lookup("home/window/side").await.is_some());
    }

    #[tokio::test]
    async fn test_repeated_topic_is_not_deduplicated() {
        let broker = Arc::new(MockBroker::new());
        let cache = TopicCache::in_memory();
        broker.inject_after(Duration::from_millis(10), "lights/kitchen", r#"{"state":"OFF"}"#);
        broker.inject_after(Duration::from_millis(40), "lights/kitchen", r#"{"state":"ON"}"#);
        broker.inject_after(Duration::from_millis(70), "lights/kitchen", r#"{"state":"ON"}"#);

        let result = record(broker.as_ref(), &cache, &request(&["lights/#"], &[]))
            .await
            .unwrap();

        assert_eq!(result.total_events, 3);
        assert_eq!(result.unique_topics, 1);
        assert_eq!(result.events[1].change_type, ChangeType::Updated);
        assert_eq!(
            result.events[1].changes,
            json!({"state": {"old": "OFF", "new": "ON"}})
        );
        assert_eq!(result.events[2].changes, json!({}));
        assert!(result.events[0].offset_secs <= result.events[1].offset_secs);
        assert_eq!(
            result.filter,
            Some(RecordFilter {
                topics: Some(strings(&["lights/#"])),
                keywords: None
            })
        );
    }

    #[tokio::test]
    async fn test_topic_and_keyword_filters_combine_with_and() {
        let broker = Arc::new(MockBroker::new());
        let cache = TopicCache::in_memory();
        broker.inject_after(Duration::from_millis(10), "home/door/front", "open");
        broker.inject_after(Duration::from_millis(20), "home/light/hall", "on");
        broker.inject_after(Duration::from_millis(30), "garage/door", "open");

        let result = record(broker.as_ref(), &cache, &request(&["home/#"], &["door"]))
            .await
            .unwrap();

        let topics: Vec<_> = result.events.iter().map(|e| e.topic.as_str()).collect();
        assert_eq!(topics, vec!["home/door/front"]);
    }

    #[tokio::test]
    async fn test_overlapping_filters_deliver_once() {
        let broker = Arc::new(MockBroker::new());
        let cache = TopicCache::in_memory();
        broker.inject_after(Duration::from_millis(10), "home/door/front", "open");

        let result = record(
            broker.as_ref(),
            &cache,
            &request(&["home/#", "home/door/front"], &[]),
        )
        .await
        .unwrap();
        assert_eq!(result.total_events, 1);
    }

    #[tokio::test]
    async fn test_ignored_prefixes_only_apply_to_catch_all() {
        let broker = Arc::new(MockBroker::new());
        let cache = TopicCache::in_memory();
        broker.inject_after(Duration::from_millis(10), "zigbee2mqtt/bridge/state", "online");
        let result = record(broker.as_ref(), &cache, &request(&[], &[]))
            .await
            .unwrap();
        assert_eq!(result.total_events, 0);
        assert_eq!(result.ignored_events, 1);
        assert!(result.filter.is_none());

        broker.inject_after(Duration::from_millis(10), "zigbee2mqtt/bridge/state", "online");
        let explicit = record(broker.as_ref(), &cache, &request(&["zigbee2mqtt/#"], &[]))
            .await
            .unwrap();
        assert_eq!(explicit.total_events, 1);
    }

    #[tokio::test]
    async fn test_invalid_filter_is_validation_error() {
        let broker = MockBroker::new();
        let cache = TopicCache::in_memory();
        let error = record(&broker, &cache, &request(&["home/#/door"], &[]))
            .await
            .unwrap_err();
        assert_eq!(error.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_empty_window_returns_empty_sequence() {
        let broker = MockBroker::new();
        let cache = TopicCache::in_memory();
        let result = record(&broker, &cache, &request(&[], &[])).await.unwrap();
        assert!(result.events.is_empty());
        assert_eq!(broker.subscription_count().await, 0);
    }
}
