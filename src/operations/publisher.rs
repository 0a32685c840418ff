//! Batch publishing with per-message validation and outcomes

use crate::protocol::messages::{ErrorCode, PublishOutcome, PublishReport};
use crate::protocol::topics::validate_topic_name;
use crate::transport::mqtt::qos_from_u8;
use crate::transport::Broker;
use rumqttc::v5::mqttbytes::QoS;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn, Instrument};

#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    /// Raw message objects `{topic, payload, qos?, retain?}`, validated one by one
    pub messages: Vec<Value>,
    /// Applied to each message separately
    pub timeout: Duration,
}

/// A message that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl OutboundMessage {
    /// Validate one raw message object
    pub fn from_value(raw: &Value) -> Result<Self, String> {
        let object = raw
            .as_object()
            .ok_or_else(|| "message must be an object".to_string())?;

        let topic = match object.get("topic") {
            Some(Value::String(topic)) => topic.clone(),
            Some(_) => return Err("'topic' must be a string".to_string()),
            None => return Err("'topic' is required".to_string()),
        };
        validate_topic_name(&topic).map_err(|e| e.to_string())?;

        let payload = object
            .get("payload")
            .map(encode_payload)
            .ok_or_else(|| "'payload' is required".to_string())?;

        let qos = match object.get("qos") {
            None | Some(Value::Null) => QoS::AtMostOnce,
            Some(value) => value
                .as_u64()
                .and_then(|level| u8::try_from(level).ok())
                .and_then(qos_from_u8)
                .ok_or_else(|| format!("'qos' must be 0, 1 or 2, got {value}"))?,
        };

        let retain = match object.get("retain") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(retain)) => *retain,
            Some(other) => return Err(format!("'retain' must be a boolean, got {other}")),
        };

        Ok(Self {
            topic,
            payload,
            qos,
            retain,
        })
    }
}

/// Wire form of a JSON payload: strings verbatim, `null` empty, anything else as JSON
pub fn encode_payload(payload: &Value) -> Vec<u8> {
    match payload {
        Value::String(text) => text.clone().into_bytes(),
        Value::Null => Vec::new(),
        other => other.to_string().into_bytes(),
    }
}

/// Publish each message in order; one failure never stops the rest
pub async fn publish_batch(broker: &dyn Broker, request: &PublishRequest) -> PublishReport {
    let mut outcomes = Vec::with_capacity(request.messages.len());

    for (index, raw) in request.messages.iter().enumerate() {
        let message = match OutboundMessage::from_value(raw) {
            Ok(message) => message,
            Err(reason) => {
                let topic = raw
                    .get("topic")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                debug!(index, "Rejected invalid message: {}", reason);
                outcomes.push(PublishOutcome::rejected(
                    index,
                    topic,
                    ErrorCode::ValidationError,
                    reason,
                ));
                continue;
            }
        };

        let span = crate::mqtt_span!(operation = "publish", topic = %message.topic);
        let sent = tokio::time::timeout(
            request.timeout,
            broker.publish(&message.topic, message.payload, message.qos, message.retain),
        )
        .instrument(span)
        .await;

        let outcome = match sent {
            Ok(Ok(())) => PublishOutcome::accepted(index, &message.topic),
            Ok(Err(e)) => {
                warn!(topic = %message.topic, "Publish failed: {}", e);
                PublishOutcome::rejected(
                    index,
                    &message.topic,
                    ErrorCode::ConnectionError,
                    format!("{} ({})", e, broker.endpoint()),
                )
            }
            Err(_) => PublishOutcome::rejected(
                index,
                &message.topic,
                ErrorCode::Timeout,
                format!(
                    "Publish not accepted within {}s",
                    request.timeout.as_secs_f64()
                ),
            ),
        };
        outcomes.push(outcome);
    }

    PublishReport::new(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBroker;
    use serde_json::json;

    fn request(messages: Vec<Value>) -> PublishRequest {
        PublishRequest {
            messages,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_encode_payload() {
        assert_eq!(encode_payload(&json!("ON")), b"ON".to_vec());
        assert_eq!(encode_payload(&json!({"state": "ON"})), br#"{"state":"ON"}"#.to_vec());
        assert_eq!(encode_payload(&json!(42)), b"42".to_vec());
        assert!(encode_payload(&Value::Null).is_empty());
    }

    #[test]
    fn test_message_validation() {
        let valid = OutboundMessage::from_value(&json!({
            "topic": "zigbee2mqtt/kitchen_light/set",
            "payload": {"state": "ON"},
            "qos": 1,
            "retain": true
        }))
        .unwrap();
        assert_eq!(valid.qos, QoS::AtLeastOnce);
        assert!(valid.retain);

        let defaults = OutboundMessage::from_value(&json!({"topic": "a/b", "payload": "x"})).unwrap();
        assert_eq!(defaults.qos, QoS::AtMostOnce);
        assert!(!defaults.retain);

        let cases = vec![
            json!("not an object"),
            json!({"payload": "x"}),
            json!({"topic": "", "payload": "x"}),
            json!({"topic": "home/+/light", "payload": "x"}),
            json!({"topic": "home/light"}),
            json!({"topic": "home/light", "payload": "x", "qos": 3}),
            json!({"topic": "home/light", "payload": "x", "qos": -1}),
            json!({"topic": "home/light", "payload": "x", "retain": "yes"}),
        ];
        for case in cases {
            assert!(OutboundMessage::from_value(&case).is_err(), "{case}");
        }
    }

    #[tokio::test]
    async fn test_invalid_message_does_not_abort_batch() {
        let broker = MockBroker::new();
        let report = publish_batch(
            &broker,
            &request(vec![
                json!({"topic": "", "payload": "x"}),
                json!({"topic": "home/light/set", "payload": "ON"}),
            ]),
        )
        .await;

        assert_eq!(report.outcomes.len(), 2);
        assert!(!report.outcomes[0].accepted);
        assert_eq!(
            report.outcomes[0].error.as_ref().unwrap().code,
            ErrorCode::ValidationError
        );
        assert!(report.outcomes[1].accepted);
        assert_eq!(report.outcomes[1].index, 1);
        assert_eq!((report.accepted, report.rejected), (1, 1));

        let published = broker.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload, b"ON".to_vec());
    }

    #[tokio::test]
    async fn test_broker_failure_is_per_message() {
        let broker = MockBroker::new();
        broker.fail_publishes(true);

        let report = publish_batch(
            &broker,
            &request(vec![
                json!({"topic": "a", "payload": 1}),
                json!({"topic": "b", "payload": 2}),
            ]),
        )
        .await;

        assert_eq!(report.rejected, 2);
        for outcome in &report.outcomes {
            let error = outcome.error.as_ref().unwrap();
            assert_eq!(error.code, ErrorCode::ConnectionError);
            assert!(error.message.contains("mock-broker:1883"));
        }
    }

    #[tokio::test]
    async fn test_disconnected_broker_rejects_without_hanging() {
        let broker = MockBroker::disconnected();
        let report = publish_batch(&broker, &request(vec![json!({"topic": "a", "payload": null})])).await;
        assert_eq!(report.rejected, 1);
    }
}
