//! Shared broker connection
//!
//! [`MqttClient`] hands out subscriptions and publishes; a [`Supervisor`] task
//! owns the rumqttc event loop and replaces it after a link failure, and a
//! second task turns dropped [`Subscription`] handles into UNSUBSCRIBE packets.

use super::connection::{configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageHandler};
use super::registry::SubscriptionRegistry;
use crate::config::BrokerSection;
use crate::transport::{Broker, Subscription, SubscriptionId};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::SubscribeProperties;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Requests rumqttc may queue before `try_*` calls start failing
const REQUEST_CAPACITY: usize = 256;

/// How long `disconnect` waits for the supervisor to wind down
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Event loop and release channel, held until `connect` spawns their tasks
struct Pending {
    event_loop: Arc<Mutex<EventLoop>>,
    release_rx: mpsc::UnboundedReceiver<SubscriptionId>,
}

/// Channels and tasks that exist once `connect` has run
struct Running {
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    supervisor: Option<JoinHandle<()>>,
    releaser: JoinHandle<()>,
}

/// Shared MQTT connection implementing [`Broker`]
pub struct MqttClient {
    config: BrokerSection,
    client: Arc<Mutex<AsyncClient>>,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    retry: ReconnectConfig,
    pending: Option<Pending>,
    running: Option<Running>,
}

/// Fresh client and event loop; rumqttc gives each a new client id
fn open_link(config: &BrokerSection) -> (AsyncClient, EventLoop) {
    AsyncClient::new(configure_mqtt_options(config), REQUEST_CAPACITY)
}

/// SUBSCRIBE at QoS 1 carrying a subscription identifier
fn subscribe_tagged(
    client: &AsyncClient,
    filter: &str,
    identifier: usize,
) -> Result<(), rumqttc::v5::ClientError> {
    let properties = SubscribeProperties {
        id: Some(identifier),
        user_properties: Vec::new(),
    };
    client.try_subscribe_with_properties(filter, QoS::AtLeastOnce, properties)
}

/// Sleep for `delay` unless shutdown is signalled first; false means stop
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Resolve once the first connection attempt settles
async fn wait_for_connack(
    mut state_rx: watch::Receiver<ConnectionState>,
    timeout: Duration,
) -> Result<(), MqttError> {
    let settled = tokio::time::timeout(
        timeout,
        state_rx.wait_for(|state| {
            !matches!(
                state,
                ConnectionState::Connecting | ConnectionState::Reconnecting(_)
            )
        }),
    )
    .await;

    match settled {
        Err(_) => Err(MqttError::ConnectionFailedStr(format!(
            "No ConnAck within {}s",
            timeout.as_secs_f64()
        ))),
        Ok(Err(_)) => Err(MqttError::ConnectionFailedStr(
            "Supervisor stopped before the broker answered".to_string(),
        )),
        Ok(Ok(state)) => match &*state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::PermanentlyDisconnected(reason) => Err(
                MqttError::ConnectionFailedStr(format!("Permanently disconnected: {reason}")),
            ),
            ConnectionState::Disconnected(reason) => {
                Err(MqttError::ConnectionFailedStr(reason.clone()))
            }
            other => Err(MqttError::NotConnected {
                state: other.clone(),
            }),
        },
    }
}

impl MqttClient {
    pub async fn new(config: BrokerSection) -> Result<Self, MqttError> {
        let retry = ReconnectConfig::default();
        HealthMonitor::validate(&retry)?;

        let (client, event_loop) = open_link(&config);
        let (registry, release_rx) = SubscriptionRegistry::new();

        Ok(MqttClient {
            config,
            client: Arc::new(Mutex::new(client)),
            registry: Arc::new(Mutex::new(registry)),
            retry,
            pending: Some(Pending {
                event_loop: Arc::new(Mutex::new(event_loop)),
                release_rx,
            }),
            running: None,
        })
    }

    /// Connect to the broker and start the background supervisor.
    ///
    /// Returns once the broker acknowledged the connection. On failure the
    /// supervisor keeps retrying in the background, so later operations can
    /// still succeed once the broker becomes reachable.
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let Pending {
            event_loop,
            release_rx,
        } = self
            .pending
            .take()
            .ok_or_else(|| MqttError::ConnectionFailedStr("Already connected".to_string()))?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let releaser = tokio::spawn(release_filters(
            release_rx,
            self.registry.clone(),
            self.client.clone(),
            shutdown_rx.clone(),
        ));

        let supervisor = Supervisor {
            config: self.config.clone(),
            event_loop,
            client: self.client.clone(),
            registry: self.registry.clone(),
            retry: self.retry.clone(),
            state_tx: state_tx.clone(),
            shutdown_rx,
            attempts: 0,
        };

        self.running = Some(Running {
            state_tx,
            state_rx: state_rx.clone(),
            shutdown_tx,
            supervisor: Some(tokio::spawn(supervisor.run())),
            releaser,
        });

        let timeout = Duration::from_secs(self.config.connect_timeout_secs.max(1));
        wait_for_connack(state_rx, timeout).await
    }

    /// Stop the background tasks and close the connection
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        let Some(mut running) = self.running.take() else {
            debug!("Disconnect requested before connect");
            return Ok(());
        };

        let _ = running.shutdown_tx.send(true);

        // A connection that never came up has nothing to close
        let client = self.client.lock().await.clone();
        if let Err(e) = client.try_disconnect() {
            debug!("DISCONNECT not queued: {}", e);
        }

        let _ = running
            .state_tx
            .send(ConnectionState::Disconnected("Client disconnected".to_string()));
        running.releaser.abort();

        if let Some(handle) = running.supervisor.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => debug!("Supervisor stopped"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Supervisor ended with error: {}", e),
                Ok(Err(_)) => {}
                Err(_) => warn!("Supervisor did not stop within {:?}", SHUTDOWN_GRACE),
            }
        }

        info!(broker = %self.config.endpoint(), "MQTT client disconnected");
        Ok(())
    }

    /// Check if the connection is permanently disconnected
    pub fn is_permanently_disconnected(&self) -> bool {
        matches!(
            Broker::connection_state(self),
            ConnectionState::PermanentlyDisconnected(_)
        )
    }

    fn ensure_connected(&self) -> Result<(), MqttError> {
        let state = Broker::connection_state(self);
        if HealthMonitor::accepts_requests(&state) {
            Ok(())
        } else {
            Err(MqttError::NotConnected { state })
        }
    }
}

/// Send UNSUBSCRIBE for filters whose last handle was dropped
async fn release_filters(
    mut release_rx: mpsc::UnboundedReceiver<SubscriptionId>,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    client: Arc<Mutex<AsyncClient>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let released = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
            released = release_rx.recv() => released,
        };
        let Some(id) = released else { break };

        // Registry stays locked until the UNSUBSCRIBE is queued so a
        // concurrent SUBSCRIBE for the same filter is ordered after it
        let mut registry = registry.lock().await;
        let orphaned = registry.release(id);
        if orphaned.is_empty() {
            continue;
        }
        let client = client.lock().await.clone();
        for filter in orphaned {
            match client.try_unsubscribe(filter.clone()) {
                Ok(()) => debug!(target: "mqtt_transport", "Unsubscribed from: {}", filter),
                Err(e) => warn!("Failed to unsubscribe from {}: {}", filter, e),
            }
        }
    }
}

/// Background owner of the event loop
struct Supervisor {
    config: BrokerSection,
    event_loop: Arc<Mutex<EventLoop>>,
    client: Arc<Mutex<AsyncClient>>,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    retry: ReconnectConfig,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
    /// Reconnection attempts since the last ConnAck
    attempts: u32,
}

impl Supervisor {
    async fn run(mut self) {
        info!(broker = %self.config.endpoint(), "MQTT supervisor started");

        loop {
            let event_loop = self.event_loop.clone();
            let keep_running = tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    changed.is_ok() && !*self.shutdown_rx.borrow()
                }
                polled = async move {
                    let mut event_loop = event_loop.lock().await;
                    event_loop.poll().await
                } => match polled {
                    Ok(event) => self.on_route(MessageHandler::route_mqtt_event(&event)).await,
                    Err(e) => {
                        error!("MQTT link error: {}", e);
                        self.set_state(HealthMonitor::next_state(ConnectionEvent::LinkError(
                            e.to_string(),
                        )))
                        .await;
                        self.reconnect().await
                    }
                },
            };
            if !keep_running {
                break;
            }
        }

        info!(broker = %self.config.endpoint(), "MQTT supervisor stopped");
    }

    /// Act on one routed event; false stops the supervisor
    async fn on_route(&mut self, route: EventRoute) -> bool {
        match route {
            EventRoute::ConnAck => {
                self.attempts = 0;
                self.set_state(HealthMonitor::next_state(ConnectionEvent::ConnAck))
                    .await;
                self.resubscribe().await;
                true
            }
            EventRoute::Message {
                message,
                subscription_identifiers,
            } => {
                debug!(target: "mqtt_transport", ids = ?subscription_identifiers, "Message on {}", message.topic);
                self.registry
                    .lock()
                    .await
                    .dispatch(&message, &subscription_identifiers);
                true
            }
            EventRoute::Disconnect(reason_code) => {
                warn!(reason_code = %reason_code, "Broker sent DISCONNECT");
                self.set_state(HealthMonitor::next_state(ConnectionEvent::BrokerClosed))
                    .await;
                self.reconnect().await
            }
            EventRoute::SubAck {
                packet_id,
                rejected,
            } => {
                match MessageHandler::check_suback(&rejected) {
                    Ok(()) => debug!(target: "mqtt_transport", packet_id, "SubAck"),
                    Err(e) => warn!(packet_id, "{}", e),
                }
                true
            }
            EventRoute::Other(packet) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", packet);
                true
            }
            EventRoute::Outgoing => true,
        }
    }

    /// Publish a new state; leaving Connected tells every live subscription
    async fn set_state(&self, state: ConnectionState) {
        let lost = HealthMonitor::feed_lost(&self.state_tx.borrow(), &state);
        if let Some(reason) = lost {
            self.registry.lock().await.broadcast_connection_lost(&reason);
        }
        let _ = self.state_tx.send(state);
    }

    /// Back off, then swap in a fresh link; false stops the supervisor
    async fn reconnect(&mut self) -> bool {
        let shutting_down = *self.shutdown_rx.borrow();
        match HealthMonitor::decide_reconnection(self.attempts, &self.retry, shutting_down) {
            ReconnectionDecision::Retry { attempt, delay_ms } => {
                self.attempts = attempt;
                self.set_state(HealthMonitor::next_state(
                    ConnectionEvent::RetryScheduled(attempt),
                ))
                .await;
                info!(attempt, delay_ms, broker = %self.config.endpoint(), "Reconnecting");

                if !interruptible_sleep(self.shutdown_rx.clone(), Duration::from_millis(delay_ms))
                    .await
                {
                    return false;
                }

                let (client, event_loop) = open_link(&self.config);
                self.event_loop = Arc::new(Mutex::new(event_loop));
                *self.client.lock().await = client;
                true
            }
            ReconnectionDecision::ShuttingDown => false,
            ReconnectionDecision::GiveUp => {
                let reason = format!("{} reconnection attempts failed", self.attempts);
                self.set_state(HealthMonitor::next_state(
                    ConnectionEvent::RetriesExhausted(reason),
                ))
                .await;
                false
            }
        }
    }

    /// Re-establish every filter that still has a live subscription
    async fn resubscribe(&self) {
        let registry = self.registry.lock().await;
        let subscriptions = registry.active_subscriptions();
        if subscriptions.is_empty() {
            return;
        }

        let client = self.client.lock().await.clone();
        for (filter, identifier) in &subscriptions {
            if let Err(e) = subscribe_tagged(&client, filter, *identifier) {
                error!("Failed to re-subscribe to {}: {}", filter, e);
            }
        }
        info!(count = subscriptions.len(), "Restored subscriptions");
    }
}

#[async_trait]
impl Broker for MqttClient {
    async fn subscribe_filters(&self, filters: &[String]) -> Result<Subscription, MqttError> {
        self.ensure_connected()?;

        let mut registry = self.registry.lock().await;
        let subscription = registry.register(filters)?;

        // SUBSCRIBE goes out even for filters already held so the broker
        // replays retained messages for this handle
        let client = self.client.lock().await.clone();
        for (filter, identifier) in registry.subscribe_requests(subscription.id()) {
            subscribe_tagged(&client, &filter, identifier).map_err(|e| {
                MqttError::SubscriptionFailed(
                    format!("Failed to subscribe to {filter}: {e}").into(),
                )
            })?;
        }

        info!(
            subscription = %subscription.id(),
            filters = ?subscription.filters(),
            "Subscribed"
        );
        Ok(subscription)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.ensure_connected()?;

        // Clone out of the lock; awaiting queue space must not block the supervisor
        let client = self.client.lock().await.clone();
        client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!(topic, ?qos, retain, "Published message");
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        match &self.running {
            Some(running) => running.state_rx.borrow().clone(),
            None => ConnectionState::Disconnected("Client not connected".to_string()),
        }
    }

    fn endpoint(&self) -> String {
        self.config.endpoint()
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.shutdown_tx.send(true);
            running.releaser.abort();
            if let Some(handle) = running.supervisor {
                handle.abort();
            }
        }
    }
}
