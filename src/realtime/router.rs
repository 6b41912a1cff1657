//! Broadcast routing
//!
//! Generic listeners are stored under an identifier built from
//! `(eventType, communityContext, componentName)`:
//! - nothing given: the wildcard `"*"`
//! - type only: `"<type>"`
//! - type and context: `"<type>-<communityContext>-<componentName>"`
//!
//! A broadcast reaches the identifier built from the message (the bare type
//! when there is no message context), then the wildcard. Object lifecycle
//! messages are additionally decoded and delivered to the subscription and
//! reference keyspaces of the [`SubscriptionRegistry`].
//! Every collection is copied before dispatch and every listener call is
//! isolated, so listeners may add or remove listeners and may panic.
use parking_lot::RwLock;
use std::collections::HashMap;

use super::keys::{payload_reference_key, payload_subscription_key};
use super::listener::{invoke_isolated, Listener, RealTimeListener};
use super::registry::SubscriptionRegistry;
use super::types::{EventType, Message, RawEvent, RealTimePayload};
use crate::arguments::is_debug_router_enabled;
use crate::errors::{RealtimeError, RealtimeResult};
use crate::logger::{self, LogTag};

pub const WILDCARD: &str = "*";

pub fn get_identifier(
    event_type: Option<EventType>,
    community_context: Option<&str>,
    component_name: Option<&str>,
) -> RealtimeResult<String> {
    let Some(event_type) = event_type else {
        return Ok(WILDCARD.to_string());
    };
    let Some(context) = community_context else {
        return Ok(event_type.as_str().to_string());
    };
    let component = component_name.ok_or_else(|| {
        RealtimeError::InvalidIdentifier(format!(
            "componentName is required with context '{}'",
            context
        ))
    })?;
    Ok(format!("{}-{}-{}", event_type.as_str(), context, component))
}

#[derive(Debug, Default)]
pub struct BroadcastRouter {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
    subscriptions: SubscriptionRegistry,
}

impl BroadcastRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Returns false if the listener is already registered under the same identifier
    pub fn add_listener(
        &self,
        listener: Listener,
        event_type: Option<EventType>,
        community_context: Option<&str>,
        component_name: Option<&str>,
    ) -> RealtimeResult<bool> {
        let id = get_identifier(event_type, community_context, component_name)?;
        let mut listeners = self.listeners.write();
        let entry = listeners.entry(id).or_default();
        if entry.contains(&listener) {
            return Ok(false);
        }
        entry.push(listener);
        Ok(true)
    }

    pub fn remove_listener(
        &self,
        listener: &Listener,
        event_type: Option<EventType>,
        community_context: Option<&str>,
        component_name: Option<&str>,
    ) -> RealtimeResult<bool> {
        let id = get_identifier(event_type, community_context, component_name)?;
        let mut listeners = self.listeners.write();
        let Some(entry) = listeners.get_mut(&id) else {
            return Ok(false);
        };
        let before = entry.len();
        entry.retain(|l| l != listener);
        let removed = entry.len() != before;
        if entry.is_empty() {
            listeners.remove(&id);
        }
        Ok(removed)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().values().map(Vec::len).sum()
    }

    /// Dispatch an event. Returns the number of listener invocations made.
    pub fn broadcast(
        &self,
        event_type: EventType,
        raw: Option<&RawEvent>,
        message: Option<&Message>,
    ) -> usize {
        // A message context narrows the listener key; without one the bare type is used
        let exact = match message {
            Some(m) => get_identifier(
                Some(event_type),
                m.community_context.as_deref(),
                m.component_name.as_deref(),
            )
            .unwrap_or_else(|e| {
                logger::warning(
                    LogTag::Router,
                    &format!("{}: {}, routing by type only", event_type, e),
                );
                event_type.as_str().to_string()
            }),
            None => event_type.as_str().to_string(),
        };
        let tiers = [exact, WILDCARD.to_string()];

        let mut invoked = 0;
        for id in &tiers {
            for listener in self.snapshot(id) {
                invoke_isolated(LogTag::Router, &format!("Listener for {}", id), || {
                    listener.call(event_type, raw, message)
                });
                invoked += 1;
            }
        }

        if event_type == EventType::ReceiveMessage {
            if let Some(message) = message {
                invoked += self.route_lifecycle(message);
            }
        }

        if is_debug_router_enabled() {
            logger::debug(
                LogTag::Router,
                &format!("{} -> {:?}: {} invocations", event_type, tiers, invoked),
            );
        }
        invoked
    }

    fn snapshot(&self, id: &str) -> Vec<Listener> {
        self.listeners.read().get(id).cloned().unwrap_or_default()
    }

    /// Deliver a lifecycle message to its subscription key and its reference key.
    /// A listener registered under both receives the event twice.
    fn route_lifecycle(&self, message: &Message) -> usize {
        match message.message_type {
            Some(t) if t.is_object_lifecycle() => {}
            _ => return 0,
        }

        let payload = match message.decode_payload::<RealTimePayload>() {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                logger::warning(
                    LogTag::Router,
                    &format!("{:?} message without payload", message.message_type),
                );
                return 0;
            }
            Err(e) => {
                logger::warning(LogTag::Router, &format!("Undecodable lifecycle payload: {}", e));
                return 0;
            }
        };

        let mut invoked = 0;
        match payload_subscription_key(&payload) {
            Ok(key) => {
                invoked += deliver(&key, self.subscriptions.subscription_listeners(&key), message, &payload)
            }
            Err(e) => logger::warning(LogTag::Router, &format!("No subscription key: {}", e)),
        }
        if let Some(key) = payload_reference_key(&payload) {
            invoked += deliver(&key, self.subscriptions.reference_listeners(&key), message, &payload);
        }
        invoked
    }
}

fn deliver(
    key: &str,
    listeners: Vec<RealTimeListener>,
    message: &Message,
    payload: &RealTimePayload,
) -> usize {
    logger::verbose(
        LogTag::Router,
        &format!("{} -> {} listeners", key, listeners.len()),
    );
    for listener in &listeners {
        invoke_isolated(LogTag::Router, &format!("Listener for {}", key), || {
            listener.call(message, payload)
        });
    }
    listeners.len()
}
