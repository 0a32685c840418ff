//! Connection health: state transitions, feed loss and retry decisions
//!
//! Kept free of I/O so the supervisor loop in `client.rs` only wires results
//! to channels.

use super::connection::{ConnectionState, MqttError, ReconnectConfig};
use tracing::{error, info, warn};

/// Something the supervisor observed on the link
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    ConnAck,
    /// The broker sent DISCONNECT
    BrokerClosed,
    LinkError(String),
    RetryScheduled(u32),
    RetriesExhausted(String),
}

/// What the supervisor should do after losing the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionDecision {
    Retry { attempt: u32, delay_ms: u64 },
    ShuttingDown,
    GiveUp,
}

pub struct HealthMonitor;

impl HealthMonitor {
    /// State after `event`, logged at the level the event deserves
    pub fn next_state(event: ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::ConnAck => {
                info!("Broker accepted the connection");
                ConnectionState::Connected
            }
            ConnectionEvent::BrokerClosed => {
                warn!("Broker closed the connection");
                ConnectionState::Disconnected("Broker disconnected".to_string())
            }
            ConnectionEvent::LinkError(reason) => {
                warn!("Broker link failed: {}", reason);
                ConnectionState::Disconnected(reason)
            }
            ConnectionEvent::RetryScheduled(attempt) => ConnectionState::Reconnecting(attempt),
            ConnectionEvent::RetriesExhausted(reason) => {
                error!("Giving up on the broker: {}", reason);
                ConnectionState::PermanentlyDisconnected(reason)
            }
        }
    }

    /// Retry, stop for shutdown, or give up once `max_attempts` is spent
    pub fn decide_reconnection(
        attempts_so_far: u32,
        config: &ReconnectConfig,
        shutting_down: bool,
    ) -> ReconnectionDecision {
        if shutting_down {
            return ReconnectionDecision::ShuttingDown;
        }
        if config
            .max_attempts
            .is_some_and(|max_attempts| attempts_so_far >= max_attempts)
        {
            return ReconnectionDecision::GiveUp;
        }

        let attempt = attempts_so_far + 1;
        ReconnectionDecision::Retry {
            attempt,
            delay_ms: config.delay_ms_for(attempt),
        }
    }

    /// Subscribe and publish requests are only taken while connected
    pub fn accepts_requests(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Reason to hand live subscriptions when `from -> to` cuts their feed
    pub fn feed_lost(from: &ConnectionState, to: &ConnectionState) -> Option<String> {
        if !matches!(from, ConnectionState::Connected) {
            return None;
        }
        match to {
            ConnectionState::Disconnected(reason)
            | ConnectionState::PermanentlyDisconnected(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    pub fn validate(config: &ReconnectConfig) -> Result<(), MqttError> {
        if config.max_attempts == Some(0) {
            return Err(MqttError::ConnectionFailedStr(
                "max_attempts must be at least 1, or None to retry forever".to_string(),
            ));
        }
        if config.sustained_delay == 0 {
            return Err(MqttError::ConnectionFailedStr(
                "sustained_delay must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
