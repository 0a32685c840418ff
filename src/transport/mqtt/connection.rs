//! Connection vocabulary: link state, retry schedule, errors and options
//!
//! Nothing here performs I/O; the supervisor in `client.rs` drives it.

use crate::config::BrokerSection;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Where the shared link stands, as seen by operations
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// First attempt in flight
    Connecting,
    Connected,
    /// Link dropped; the supervisor may still retry
    Disconnected(String),
    /// Waiting out backoff before the given attempt
    Reconnecting(u32),
    /// Retries used up; nothing will reconnect
    PermanentlyDisconnected(String),
}

/// Retry schedule after a lost link
///
/// Attempt `n` (1-based) waits `backoff_pattern[n - 1]` milliseconds, or
/// `sustained_delay` once the pattern runs out.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// `None` retries forever
    pub max_attempts: Option<u32>,
    pub backoff_pattern: Vec<u64>,
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl ReconnectConfig {
    pub fn delay_ms_for(&self, attempt: u32) -> u64 {
        attempt
            .checked_sub(1)
            .and_then(|index| self.backoff_pattern.get(index as usize))
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    /// Sum of every backoff delay before giving up, `None` when unbounded
    pub fn worst_case_total_ms(&self) -> Option<u64> {
        let max_attempts = self.max_attempts?;
        Some((1..=max_attempts).map(|attempt| self.delay_ms_for(attempt)).sum())
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed: {0}")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Invalid topic filter: {0}")]
    InvalidFilter(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
}

impl MqttError {
    /// Whether the error means the connection itself is unusable
    pub fn is_connection_problem(&self) -> bool {
        matches!(
            self,
            MqttError::ConnectionFailed(_)
                | MqttError::NotConnected { .. }
                | MqttError::ConnectionFailedStr(_)
        )
    }
}

/// Unique client id per connection attempt to avoid session takeover between attempts
pub fn generate_client_id(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &suffix[..12])
}

/// Build rumqttc options from the broker section
pub fn configure_mqtt_options(config: &BrokerSection) -> MqttOptions {
    let client_id = generate_client_id(&config.client_id_prefix);
    let mut mqtt_options = MqttOptions::new(client_id, config.host.clone(), config.port);

    if config.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    // No username means anonymous
    if let Some(username) = &config.username {
        let password = config.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username.clone(), password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    mqtt_options.set_clean_start(true);

    // Retained dumps from busy brokers regularly exceed the 10KB default
    mqtt_options.set_max_packet_size(Some(1024 * 1024));

    mqtt_options
}

/// QoS to its wire number
pub fn qos_to_u8(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

/// Wire number to QoS, `None` outside 0..=2
pub fn qos_from_u8(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}
