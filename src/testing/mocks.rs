//! Mock implementations for testing
//!
//! [`MockBroker`] implements [`Broker`] in-process on top of the same
//! [`SubscriptionRegistry`] the real client uses. It behaves like an MQTT v5
//! broker that supports subscription identifiers: a SUBSCRIBE replays matching
//! retained messages tagged with its own identifier, and a live message is
//! forwarded once per matching subscription. Published messages loop back.

use crate::protocol::topics::topic_matches_filter;
use crate::transport::mqtt::SubscriptionRegistry;
use crate::transport::{
    Broker, ConnectionState, InboundMessage, MqttError, Subscription, SubscriptionId,
};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// A message handed to [`MockBroker::publish`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

struct MockRegistry {
    registry: SubscriptionRegistry,
    release_rx: mpsc::UnboundedReceiver<SubscriptionId>,
}

impl MockRegistry {
    /// Apply releases from dropped handles
    fn drain_releases(&mut self) {
        while let Ok(id) = self.release_rx.try_recv() {
            self.registry.release(id);
        }
    }

    /// Forward a live message the way a v5 broker does: one copy per matching
    /// subscription, tagged with that subscription's identifier
    fn forward(&mut self, message: &InboundMessage) -> usize {
        self.drain_releases();
        self.registry
            .active_subscriptions()
            .into_iter()
            .filter(|(filter, _)| topic_matches_filter(&message.topic, filter))
            .map(|(_, identifier)| self.registry.dispatch(message, &[identifier]))
            .sum()
    }
}

/// In-process broker for tests
pub struct MockBroker {
    endpoint: String,
    connected: AtomicBool,
    fail_publishes: AtomicBool,
    subscribe_calls: AtomicUsize,
    registry: Mutex<MockRegistry>,
    retained: Mutex<BTreeMap<String, Vec<u8>>>,
    published: Mutex<Vec<PublishedMessage>>,
}

impl MockBroker {
    pub fn new() -> Self {
        let (registry, release_rx) = SubscriptionRegistry::new();
        Self {
            endpoint: "mock-broker:1883".to_string(),
            connected: AtomicBool::new(true),
            fail_publishes: AtomicBool::new(false),
            subscribe_calls: AtomicUsize::new(0),
            registry: Mutex::new(MockRegistry {
                registry,
                release_rx,
            }),
            retained: Mutex::new(BTreeMap::new()),
            published: Mutex::new(Vec::new()),
        }
    }

    /// Broker that refuses every operation until [`set_connected`](Self::set_connected)
    pub fn disconnected() -> Self {
        let broker = Self::new();
        broker.connected.store(false, Ordering::SeqCst);
        broker
    }

    /// Store a retained message, replayed to every later subscriber
    pub async fn retain(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.retained
            .lock()
            .await
            .insert(topic.into(), payload.into());
    }

    /// Deliver a live message now; returns how many subscriptions received it
    pub async fn inject(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> usize {
        let message = InboundMessage::new(topic.into(), payload.into(), QoS::AtMostOnce, false);
        self.registry.lock().await.forward(&message)
    }

    /// Deliver a live message after `delay`
    pub fn inject_after(
        self: &Arc<Self>,
        delay: Duration,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> JoinHandle<usize> {
        let broker = self.clone();
        let topic = topic.into();
        let payload = payload.into();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            broker.inject(topic, payload).await
        })
    }

    /// Flip the connection; going down notifies every live subscription
    pub async fn set_connected(&self, connected: bool) {
        let was_connected = self.connected.swap(connected, Ordering::SeqCst);
        if was_connected && !connected {
            let mut registry = self.registry.lock().await;
            registry.drain_releases();
            registry
                .registry
                .broadcast_connection_lost("mock connection dropped");
        }
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    /// Filters with at least one live subscription
    pub async fn active_filters(&self) -> Vec<String> {
        let mut registry = self.registry.lock().await;
        registry.drain_releases();
        registry.registry.active_filters()
    }

    pub async fn subscription_count(&self) -> usize {
        let mut registry = self.registry.lock().await;
        registry.drain_releases();
        registry.registry.len()
    }

    /// Number of successful subscribe calls so far
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    fn check_connected(&self) -> Result<(), MqttError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MqttError::NotConnected {
                state: self.connection_state(),
            })
        }
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn subscribe_filters(&self, filters: &[String]) -> Result<Subscription, MqttError> {
        self.check_connected()?;

        let mut registry = self.registry.lock().await;
        registry.drain_releases();
        let subscription = registry.registry.register(filters)?;
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        // Each SUBSCRIBE replays matching retained messages, tagged with its identifier
        let retained = self.retained.lock().await;
        for (filter, identifier) in registry.registry.subscribe_requests(subscription.id()) {
            for (topic, payload) in retained.iter() {
                if topic_matches_filter(topic, &filter) {
                    let message =
                        InboundMessage::new(topic.clone(), payload.clone(), QoS::AtLeastOnce, true);
                    registry.registry.dispatch(&message, &[identifier]);
                }
            }
        }

        Ok(subscription)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.check_connected()?;
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(MqttError::PublishFailed("mock publish failure".into()));
        }

        self.published.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.clone(),
            qos,
            retain,
        });

        if retain {
            let mut retained = self.retained.lock().await;
            // An empty retained payload clears the slot
            if payload.is_empty() {
                retained.remove(topic);
            } else {
                retained.insert(topic.to_string(), payload.clone());
            }
        }

        let message = InboundMessage::new(topic, payload, qos, false);
        self.registry.lock().await.forward(&message);
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected("mock broker offline".to_string())
        }
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}
