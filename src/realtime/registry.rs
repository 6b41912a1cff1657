//! Listener registry for object lifecycle events
//!
//! Two independent keyspaces, each `key -> ordered listeners`:
//! - by subscription (`sub:` keys), owned by a context
//! - by object reference (`ref:` keys), addressable without the owning context
//!
//! The registry never drops listeners on its own; callers add and remove them.
use parking_lot::Mutex;
use std::collections::HashMap;

use super::keys::{key_context, reference_key, Subscription};
use super::listener::RealTimeListener;
use super::types::RealTimeComponent;
use crate::arguments::is_debug_registry_enabled;
use crate::logger::{self, LogTag};

/// One keyspace. Keys never map to an empty collection.
#[derive(Debug, Default)]
struct Keyspace {
    entries: Mutex<HashMap<String, Vec<RealTimeListener>>>,
}

impl Keyspace {
    fn add(&self, key: String, listener: RealTimeListener) -> bool {
        let mut entries = self.entries.lock();
        let listeners = entries.entry(key).or_default();
        if listeners.contains(&listener) {
            return false;
        }
        listeners.push(listener);
        true
    }

    fn remove(&self, key: &str, listener: &RealTimeListener) -> bool {
        let mut entries = self.entries.lock();
        let Some(listeners) = entries.get_mut(key) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|l| l != listener);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            entries.remove(key);
        }
        removed
    }

    /// Drop every key the predicate accepts, returning the listener count removed
    fn remove_where<P: Fn(&str) -> bool>(&self, predicate: P) -> usize {
        let mut entries = self.entries.lock();
        let mut removed = 0;
        entries.retain(|key, listeners| {
            if predicate(key) {
                removed += listeners.len();
                false
            } else {
                true
            }
        });
        removed
    }

    fn snapshot(&self, key: &str) -> Vec<RealTimeListener> {
        self.entries.lock().get(key).cloned().unwrap_or_default()
    }

    fn contains_key(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn listener_count(&self) -> usize {
        self.entries.lock().values().map(Vec::len).sum()
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    by_subscription: Keyspace,
    by_reference: Keyspace,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the listener was already registered under this subscription
    pub fn add_by_subscription(
        &self,
        subscription: &Subscription,
        listener: RealTimeListener,
    ) -> bool {
        let key = subscription.key();
        let added = self.by_subscription.add(key.clone(), listener);
        if is_debug_registry_enabled() {
            logger::debug(
                LogTag::Registry,
                &format!("add {} (added={})", key, added),
            );
        }
        added
    }

    /// Returns false if the listener was already registered under this reference
    pub fn add_by_reference(
        &self,
        component: RealTimeComponent,
        obfuscated_reference: &str,
        listener: RealTimeListener,
    ) -> bool {
        let key = reference_key(component, obfuscated_reference);
        let added = self.by_reference.add(key.clone(), listener);
        if is_debug_registry_enabled() {
            logger::debug(
                LogTag::Registry,
                &format!("add {} (added={})", key, added),
            );
        }
        added
    }

    pub fn remove_by_subscription(
        &self,
        subscription: &Subscription,
        listener: &RealTimeListener,
    ) -> bool {
        self.by_subscription.remove(&subscription.key(), listener)
    }

    pub fn remove_by_reference(
        &self,
        component: RealTimeComponent,
        obfuscated_reference: &str,
        listener: &RealTimeListener,
    ) -> bool {
        self.by_reference
            .remove(&reference_key(component, obfuscated_reference), listener)
    }

    /// Without a context both keyspaces are cleared. With one, only keys whose
    /// context segment equals it are removed. Returns the number of listeners removed.
    pub fn remove_all(&self, context: Option<&str>) -> usize {
        let removed = match context {
            None => self.by_subscription.remove_where(|_| true) + self.by_reference.remove_where(|_| true),
            Some(context) => {
                let matches = |key: &str| key_context(key) == Some(context);
                self.by_subscription.remove_where(matches) + self.by_reference.remove_where(matches)
            }
        };

        if is_debug_registry_enabled() {
            logger::debug(
                LogTag::Registry,
                &format!("remove_all {:?}: {} listeners removed", context, removed),
            );
        }
        removed
    }

    /// Copy of the listeners under a subscription key, safe to iterate while the registry changes
    pub fn subscription_listeners(&self, key: &str) -> Vec<RealTimeListener> {
        self.by_subscription.snapshot(key)
    }

    pub fn reference_listeners(&self, key: &str) -> Vec<RealTimeListener> {
        self.by_reference.snapshot(key)
    }

    pub fn has_subscription_key(&self, key: &str) -> bool {
        self.by_subscription.contains_key(key)
    }

    pub fn has_reference_key(&self, key: &str) -> bool {
        self.by_reference.contains_key(key)
    }

    /// Total listeners across both keyspaces
    pub fn len(&self) -> usize {
        self.by_subscription.listener_count() + self.by_reference.listener_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
