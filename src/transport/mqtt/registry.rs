//! Local subscription bookkeeping for the shared connection
//!
//! Many operations can hold handles on the same topic filter at once, so the
//! registry reference-counts filters and decides which handles each inbound
//! PUBLISH belongs to.
//!
//! Every SUBSCRIBE carries its own MQTT v5 subscription identifier. A
//! subscribe-triggered retained replay (RETAIN set) comes back tagged with the
//! identifier of the SUBSCRIBE that caused it and goes to that handle only.
//! A live message names the identifiers of the broker-side subscriptions it
//! stands for; a handle receives it only when the first of its own filters
//! matching the topic is among them, so a broker that sends one copy per
//! overlapping subscription still yields one delivery per handle. Messages
//! without identifiers fall back to plain filter matching.

use super::connection::MqttError;
use crate::protocol::topics::{topic_matches_filter, validate_topic_filter};
use crate::transport::{BrokerEvent, InboundMessage, Subscription, SubscriptionId};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// Events buffered per subscription before delivery becomes lossy
pub const DELIVERY_BUFFER: usize = 4096;

/// Largest subscription identifier MQTT v5 allows
pub const MAX_SUBSCRIPTION_IDENTIFIER: usize = 268_435_455;

struct Registration {
    filters: Vec<String>,
    sender: mpsc::Sender<BrokerEvent>,
    /// Retained topics already replayed to this handle
    replayed: HashSet<String>,
}

/// One SUBSCRIBE sent for a registration
struct Binding {
    filter: String,
    owner: SubscriptionId,
}

pub struct SubscriptionRegistry {
    next_id: u64,
    next_identifier: usize,
    capacity: usize,
    registrations: HashMap<SubscriptionId, Registration>,
    filter_refs: HashMap<String, usize>,
    bindings: HashMap<usize, Binding>,
    /// Identifiers sent per active filter, most recent last
    filter_bindings: HashMap<String, Vec<usize>>,
    release_tx: mpsc::UnboundedSender<SubscriptionId>,
    dropped: u64,
}

impl SubscriptionRegistry {
    /// Create a registry and the receiver on which dropped handles report their ids
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SubscriptionId>) {
        Self::with_capacity(DELIVERY_BUFFER)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::UnboundedReceiver<SubscriptionId>) {
        let (release_tx, release_rx) = mpsc::unbounded_channel();
        let registry = Self {
            next_id: 1,
            next_identifier: 1,
            capacity: capacity.max(1),
            registrations: HashMap::new(),
            filter_refs: HashMap::new(),
            bindings: HashMap::new(),
            filter_bindings: HashMap::new(),
            release_tx,
            dropped: 0,
        };
        (registry, release_rx)
    }

    fn allocate_identifier(&mut self) -> usize {
        let identifier = self.next_identifier;
        self.next_identifier = identifier % MAX_SUBSCRIPTION_IDENTIFIER + 1;
        identifier
    }

    /// Register a handle over `filters`; duplicates within the list are ignored
    pub fn register(&mut self, filters: &[String]) -> Result<Subscription, MqttError> {
        if filters.is_empty() {
            return Err(MqttError::InvalidFilter(
                "at least one topic filter is required".to_string(),
            ));
        }

        let mut unique: Vec<String> = Vec::with_capacity(filters.len());
        for filter in filters {
            validate_topic_filter(filter)
                .map_err(|e| MqttError::InvalidFilter(format!("{filter}: {e}")))?;
            if !unique.contains(filter) {
                unique.push(filter.clone());
            }
        }

        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        for filter in &unique {
            *self.filter_refs.entry(filter.clone()).or_insert(0) += 1;
            let identifier = self.allocate_identifier();
            self.bindings.insert(
                identifier,
                Binding {
                    filter: filter.clone(),
                    owner: id,
                },
            );
            self.filter_bindings
                .entry(filter.clone())
                .or_default()
                .push(identifier);
        }

        let (sender, receiver) = mpsc::channel(self.capacity);
        self.registrations.insert(
            id,
            Registration {
                filters: unique.clone(),
                sender,
                replayed: HashSet::new(),
            },
        );

        debug!(subscription = %id, filters = ?unique, "Registered subscription");
        Ok(Subscription::new(
            id,
            unique,
            receiver,
            self.release_tx.clone(),
        ))
    }

    /// `(filter, identifier)` pairs to SUBSCRIBE with for a new registration
    pub fn subscribe_requests(&self, id: SubscriptionId) -> Vec<(String, usize)> {
        let mut requests: Vec<(String, usize)> = self
            .bindings
            .iter()
            .filter(|(_, binding)| binding.owner == id)
            .map(|(identifier, binding)| (binding.filter.clone(), *identifier))
            .collect();
        requests.sort_by_key(|(_, identifier)| *identifier);
        requests
    }

    /// Forget a registration; returns filters no other registration still uses
    pub fn release(&mut self, id: SubscriptionId) -> Vec<String> {
        let Some(registration) = self.registrations.remove(&id) else {
            return Vec::new();
        };

        let mut orphaned = Vec::new();
        for filter in registration.filters {
            if let Some(count) = self.filter_refs.get_mut(&filter) {
                *count -= 1;
                if *count == 0 {
                    self.filter_refs.remove(&filter);
                    // The broker keeps the latest SUBSCRIBE's identifier while
                    // the filter is held, so bindings only go with the filter
                    for identifier in self.filter_bindings.remove(&filter).unwrap_or_default() {
                        self.bindings.remove(&identifier);
                    }
                    orphaned.push(filter);
                }
            }
        }

        debug!(subscription = %id, orphaned = ?orphaned, "Released subscription");
        orphaned
    }

    /// Route one PUBLISH, returning how many handles received it
    ///
    /// `subscription_identifiers` are the identifiers the broker attached to
    /// this copy of the message.
    pub fn dispatch(
        &mut self,
        message: &InboundMessage,
        subscription_identifiers: &[usize],
    ) -> usize {
        let targets: Vec<SubscriptionId> = if subscription_identifiers.is_empty() {
            self.matching(message)
        } else if message.retain {
            self.replay_targets(message, subscription_identifiers)
        } else {
            self.live_targets(message, subscription_identifiers)
        };

        let mut delivered = 0;
        for id in targets {
            let Some(registration) = self.registrations.get(&id) else {
                continue;
            };
            match registration
                .sender
                .try_send(BrokerEvent::Message(message.clone()))
            {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.dropped += 1;
                    debug!(subscription = %id, topic = %message.topic, "Subscription buffer full, dropping message");
                }
                // Handle dropped; its release is already queued
                Err(TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Every registration with a filter matching the topic
    fn matching(&self, message: &InboundMessage) -> Vec<SubscriptionId> {
        self.registrations
            .iter()
            .filter(|(_, registration)| {
                registration
                    .filters
                    .iter()
                    .any(|filter| topic_matches_filter(&message.topic, filter))
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// The handles whose SUBSCRIBE triggered this replay, once per topic each
    fn replay_targets(&mut self, message: &InboundMessage, identifiers: &[usize]) -> Vec<SubscriptionId> {
        let owners: HashSet<SubscriptionId> = identifiers
            .iter()
            .filter_map(|identifier| self.bindings.get(identifier))
            .map(|binding| binding.owner)
            .collect();

        owners
            .into_iter()
            .filter(|owner| {
                self.registrations
                    .get_mut(owner)
                    .is_some_and(|registration| registration.replayed.insert(message.topic.clone()))
            })
            .collect()
    }

    /// Handles whose first matching filter is one this copy stands for
    fn live_targets(&self, message: &InboundMessage, identifiers: &[usize]) -> Vec<SubscriptionId> {
        let covered: HashSet<&str> = identifiers
            .iter()
            .filter_map(|identifier| self.bindings.get(identifier))
            .map(|binding| binding.filter.as_str())
            .collect();

        self.registrations
            .iter()
            .filter(|(_, registration)| {
                registration
                    .filters
                    .iter()
                    .find(|filter| topic_matches_filter(&message.topic, filter))
                    .is_some_and(|filter| covered.contains(filter.as_str()))
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Tell every registration that the connection dropped
    pub fn broadcast_connection_lost(&self, reason: &str) {
        for registration in self.registrations.values() {
            let _ = registration
                .sender
                .try_send(BrokerEvent::ConnectionLost(reason.to_string()));
        }
    }

    /// Filters with at least one live registration, sorted
    pub fn active_filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = self.filter_refs.keys().cloned().collect();
        filters.sort();
        filters
    }

    /// Each active filter with the identifier the broker currently holds for it
    pub fn active_subscriptions(&self) -> Vec<(String, usize)> {
        let mut subscriptions: Vec<(String, usize)> = self
            .filter_bindings
            .iter()
            .filter_map(|(filter, identifiers)| {
                identifiers
                    .last()
                    .map(|identifier| (filter.clone(), *identifier))
            })
            .collect();
        subscriptions.sort();
        subscriptions
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Messages lost because a subscriber fell behind
    pub fn dropped_messages(&self) -> u64 {
        self.dropped
    }
}
