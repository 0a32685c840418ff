//! Broker abstraction shared by every operation
//!
//! Operations never touch the MQTT client directly. They go through the
//! [`Broker`] trait, which hands out [`Subscription`] handles and publishes
//! single messages. The production implementation is [`mqtt::MqttClient`];
//! tests use [`crate::testing::MockBroker`].

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rumqttc::v5::mqttbytes::QoS;
use tokio::sync::mpsc;

pub mod mqtt;

pub use mqtt::{ConnectionState, MqttError};

/// Message delivered to a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
            received_at: Utc::now(),
        }
    }
}

/// What a subscription can observe
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    Message(InboundMessage),
    /// The shared connection dropped; delivery resumes after reconnection
    ConnectionLost(String),
}

/// Identifier of one registered subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Handle to an active subscription
///
/// Dropping the handle unregisters it, so a deadline that cancels the owning
/// future also releases the broker-side subscription.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    filters: Vec<String>,
    receiver: mpsc::Receiver<BrokerEvent>,
    release: mpsc::UnboundedSender<SubscriptionId>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        filters: Vec<String>,
        receiver: mpsc::Receiver<BrokerEvent>,
        release: mpsc::UnboundedSender<SubscriptionId>,
    ) -> Self {
        Self {
            id,
            filters,
            receiver,
            release,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    /// Wait for the next event; `None` once the broker side has gone away
    pub async fn next_event(&mut self) -> Option<BrokerEvent> {
        self.receiver.recv().await
    }

    /// Take an already buffered event without waiting
    pub fn try_next_event(&mut self) -> Option<BrokerEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // The connection may already be gone; nothing left to unregister then
        let _ = self.release.send(self.id);
    }
}

/// Subscribe/publish primitives over one shared broker connection
#[async_trait]
pub trait Broker: Send + Sync {
    /// Register interest in one or more topic filters under a single handle.
    /// A message matching several of the filters is delivered once.
    async fn subscribe_filters(&self, filters: &[String]) -> Result<Subscription, MqttError>;

    /// Register interest in a single topic filter
    async fn subscribe(&self, filter: &str) -> Result<Subscription, MqttError> {
        self.subscribe_filters(&[filter.to_string()]).await
    }

    /// Stop delivery for a handle; safe even if nothing was ever delivered
    async fn unsubscribe(&self, subscription: Subscription) -> Result<(), MqttError> {
        drop(subscription);
        Ok(())
    }

    /// Send one message
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError>;

    /// Current connection state
    fn connection_state(&self) -> ConnectionState;

    /// `host:port` of the broker, for error reporting
    fn endpoint(&self) -> String;

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), ConnectionState::Connected)
    }
}
