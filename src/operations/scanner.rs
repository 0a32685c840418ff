//! Topic discovery: a bounded catch-all scan merged into the cache

use super::{flush_cache, observation_from, subscribe_error};
use crate::cache::{MergeOutcome, TopicCache};
use crate::error::ToolsResult;
use crate::protocol::messages::{rounded_secs, ScanResult, TopicSummary};
use crate::protocol::topics::CATCH_ALL_FILTER;
use crate::transport::{Broker, BrokerEvent};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    /// How long to listen on the catch-all filter
    pub scan_timeout: Duration,
    /// OR-combined, case-insensitive substrings; empty matches everything
    pub keywords: Vec<String>,
    pub limit: usize,
    pub offset: usize,
    pub include_values: bool,
}

impl Default for ScanRequest {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(5),
            keywords: Vec::new(),
            limit: 50,
            offset: 0,
            include_values: false,
        }
    }
}

/// Listen for `scan_timeout`, merge everything seen, then page through the cache
pub async fn scan(
    broker: &dyn Broker,
    cache: &TopicCache,
    request: &ScanRequest,
) -> ToolsResult<ScanResult> {
    let started = Instant::now();
    let span = crate::mqtt_span!(
        operation = "scan",
        filter = CATCH_ALL_FILTER,
        timeout_secs = request.scan_timeout.as_secs_f64()
    );

    let (observed, new_topics, degraded) = async {
        let mut subscription = broker
            .subscribe(CATCH_ALL_FILTER)
            .await
            .map_err(|e| subscribe_error(broker, e))?;

        let mut observed: HashSet<String> = HashSet::new();
        let mut new_topics = 0usize;
        let mut degraded = false;

        let deadline = tokio::time::sleep(request.scan_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = subscription.next_event() => match event {
                    Some(BrokerEvent::Message(message)) => {
                        observed.insert(message.topic.clone());
                        if cache.merge(observation_from(&message)).await == MergeOutcome::Inserted {
                            new_topics += 1;
                        }
                    }
                    Some(BrokerEvent::ConnectionLost(reason)) => {
                        warn!("Connection lost during scan, results may be partial: {}", reason);
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
        debug!(observed = observed.len(), new_topics, "Scan window closed");
        Ok::<_, crate::error::ToolsError>((observed.len(), new_topics, degraded))
    }
    .instrument(span)
    .await?;

    flush_cache(cache).await;

    let page = cache
        .query(&request.keywords, request.limit, request.offset)
        .await;
    let matches: Vec<TopicSummary> = page
        .entries
        .into_iter()
        .map(|entry| TopicSummary {
            value: if request.include_values {
                entry.value.as_ref().map(|value| value.decoded())
            } else {
                None
            },
            topic: entry.topic,
            last_seen: entry.last_seen,
            qos: entry.qos,
            retained: entry.retained,
        })
        .collect();

    let has_more = request.offset + matches.len() < page.total;
    info!(
        observed,
        new_topics,
        total = page.total,
        returned = matches.len(),
        "Topic scan complete"
    );

    Ok(ScanResult {
        matches,
        total: page.total,
        offset: request.offset,
        limit: request.limit,
        has_more,
        observed,
        new_topics,
        degraded,
        duration_secs: rounded_secs(started.elapsed()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Observation;
    use crate::protocol::ErrorCode;
    use crate::testing::MockBroker;
    use chrono::Utc;
    use std::sync::Arc;

    fn request(keywords: &[&str], limit: usize, offset: usize) -> ScanRequest {
        ScanRequest {
            scan_timeout: Duration::from_millis(100),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            limit,
            offset,
            include_values: false,
        }
    }

    #[tokio::test]
    async fn test_empty_broker_and_cache_is_not_an_error() {
        let broker = MockBroker::new();
        let cache = TopicCache::in_memory();

        let result = scan(&broker, &cache, &request(&[], 50, 0)).await.unwrap();
        assert!(result.matches.is_empty());
        assert_eq!(result.total, 0);
        assert!(!result.has_more);
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn test_scan_merges_retained_and_live_topics() {
        let broker = Arc::new(MockBroker::new());
        broker.retain("zigbee2mqtt/kitchen_light", r#"{"state":"ON"}"#).await;
        broker.inject_after(Duration::from_millis(20), "home/door/front", "open");
        let cache = TopicCache::in_memory();

        let mut req = request(&[], 50, 0);
        req.include_values = true;
        let result = scan(broker.as_ref(), &cache, &req).await.unwrap();

        assert_eq!(result.total, 2);
        assert_eq!(result.observed, 2);
        assert_eq!(result.new_topics, 2);
        assert_eq!(result.matches[0].topic, "home/door/front");
        assert_eq!(result.matches[0].value, Some(serde_json::json!("open")));
        assert_eq!(
            result.matches[1].value,
            Some(serde_json::json!({"state": "ON"}))
        );
        assert!(cache.lookup("home/door/front").await.is_some());
        assert_eq!(broker.subscription_count().await, 0, "scan released its handle");
    }

    #[tokio::test]
    async fn test_scan_includes_previously_cached_topics() {
        let broker = MockBroker::new();
        let cache = TopicCache::in_memory();
        cache
            .merge(Observation::topic_only("garage/door", Utc::now()))
            .await;

        let result = scan(&broker, &cache, &request(&["door"], 50, 0))
            .await
            .unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.observed, 0);
        assert!(result.matches[0].value.is_none());
    }

    #[tokio::test]
    async fn test_pagination_reports_has_more() {
        let broker = MockBroker::new();
        let cache = TopicCache::in_memory();
        for i in 0..5 {
            cache
                .merge(Observation::topic_only(format!("sensor/{i}"), Utc::now()))
                .await;
        }

        let first = scan(&broker, &cache, &request(&[], 2, 0)).await.unwrap();
        assert_eq!(first.matches.len(), 2);
        assert!(first.has_more);

        let last = scan(&broker, &cache, &request(&[], 2, 4)).await.unwrap();
        assert_eq!(last.matches.len(), 1);
        assert!(!last.has_more);
        assert_eq!(last.total, 5);
    }

    #[tokio::test]
    async fn test_connection_failure_is_structured() {
        let broker = MockBroker::disconnected();
        let cache = TopicCache::in_memory();

        let error = scan(&broker, &cache, &request(&[], 50, 0))
            .await
            .unwrap_err();
        let result = error.to_error_result();
        assert_eq!(result.code, ErrorCode::ConnectionError);
        assert!(result.message.contains("mock-broker:1883"));
    }

    #[tokio::test]
    async fn test_connection_drop_marks_result_degraded() {
        let broker = Arc::new(MockBroker::new());
        broker.retain("home/door", "open").await;
        let cache = TopicCache::in_memory();

        let dropper = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            dropper.set_connected(false).await;
        });

        let result = scan(broker.as_ref(), &cache, &request(&[], 50, 0))
            .await
            .unwrap();
        assert!(result.degraded);
        assert_eq!(result.total, 1, "partial results are kept");
    }

    #[tokio::test]
    async fn test_scan_respects_deadline_without_traffic() {
        let broker = MockBroker::new();
        let cache = TopicCache::in_memory();

        let started = Instant::now();
        scan(&broker, &cache, &request(&[], 50, 0)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
