//! MQTT Tools - broker discovery, reads, publishing and recording
//!
//! This crate exposes four operations against an MQTT broker, backed by a
//! persistent cache of every topic it has seen:
//! - `topics` - scan the broker and page through known topics
//! - `value` - read current values, answering from the cache when possible
//! - `publish` - publish a batch of messages with per-message outcomes
//! - `record` - capture every matching message for a time window
//!
//! The operations run against the [`transport::Broker`] trait, implemented by
//! [`MqttClient`] for real brokers and [`testing::MockBroker`] in-process.
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_tools::cache::TopicCache;
//! use mqtt_tools::config::ToolsConfig;
//! use mqtt_tools::testing::MockBroker;
//! use mqtt_tools::tools::{ToolContext, ToolSystem};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let broker = Arc::new(MockBroker::new());
//! broker.retain("sensors/temp", "21.5").await;
//!
//! let context = ToolContext::new(
//!     broker,
//!     Arc::new(TopicCache::in_memory()),
//!     ToolsConfig::default(),
//! );
//! let tools = ToolSystem::with_builtin_tools(context);
//!
//! let output = tools
//!     .execute_tool("value", &json!({"topics": ["sensors/temp"], "timeout": 1}))
//!     .await
//!     .unwrap();
//! assert_eq!(output["values"][0]["value"], 21.5);
//! # });
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod observability;
pub mod operations;
pub mod protocol;
pub mod testing;
pub mod tools;
pub mod transport;

pub use cache::{TopicCache, TopicEntry};
pub use config::*;
pub use error::{ToolsError, ToolsResult};
pub use protocol::*;
pub use tools::{Tool, ToolContext, ToolDescription, ToolError, ToolSystem};
pub use transport::mqtt::MqttClient;
pub use transport::Broker;
