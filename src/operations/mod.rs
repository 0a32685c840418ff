//! The four broker operations
//!
//! Each engine takes the shared [`Broker`] and [`TopicCache`] by reference and
//! enforces its own deadline. A deadline drops the [`Subscription`] it was
//! waiting on, which unregisters it from the connection.
//!
//! [`Subscription`]: crate::transport::Subscription

pub mod publisher;
pub mod reader;
pub mod recorder;
pub mod scanner;

pub use publisher::{encode_payload, publish_batch, OutboundMessage, PublishRequest};
pub use reader::{read_values, ValueRequest};
pub use recorder::{payload_changes, record, RecordRequest};
pub use scanner::{scan, ScanRequest};

use crate::cache::{Observation, TopicCache};
use crate::error::ToolsError;
use crate::transport::mqtt::qos_to_u8;
use crate::transport::{Broker, InboundMessage, MqttError};
use tracing::warn;

/// Cache observation for a message as it arrived
pub(crate) fn observation_from(message: &InboundMessage) -> Observation {
    Observation::topic_only(message.topic.clone(), message.received_at)
        .with_payload(message.payload.to_vec())
        .with_metadata(qos_to_u8(message.qos), message.retain)
}

/// Map a subscribe failure to the operation taxonomy
pub(crate) fn subscribe_error(broker: &dyn Broker, error: MqttError) -> ToolsError {
    match error {
        MqttError::InvalidFilter(message) => ToolsError::validation(message),
        other => ToolsError::connection(broker.endpoint(), &other),
    }
}

/// Persist pending merges; failures degrade to in-memory operation
pub(crate) async fn flush_cache(cache: &TopicCache) {
    if let Err(e) = cache.flush().await {
        warn!("Topic cache not saved, keeping in-memory state: {}", e);
    }
}
