//! MQTT v5 implementation of the [`Broker`](crate::transport::Broker) trait
//!
//! This module separates pure functions from I/O operations for better
//! testability.
//!
//! # Architecture
//!
//! - [`connection`] - Pure connection state, backoff and option construction
//! - [`message_handler`] - Pure event routing
//! - [`health_monitor`] - Pure reconnection decisions
//! - [`registry`] - Reference-counted local subscriptions and fan-out
//! - [`client`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_tools::config::BrokerSection;
//! use mqtt_tools::transport::mqtt::MqttClient;
//! use mqtt_tools::transport::Broker;
//!
//! # tokio_test::block_on(async {
//! let mut client = MqttClient::new(BrokerSection::default()).await?;
//! client.connect().await?;
//! let mut subscription = client.subscribe("zigbee2mqtt/#").await?;
//! if let Some(event) = subscription.next_event().await {
//!     println!("{event:?}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;
pub mod registry;

pub use client::MqttClient;
pub use connection::{qos_from_u8, qos_to_u8, ConnectionState, MqttError, ReconnectConfig};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler};
pub use registry::SubscriptionRegistry;
