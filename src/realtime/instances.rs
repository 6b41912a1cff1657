//! Per-community connection registry
//!
//! Owned by the application: build one at startup, hand clones to whatever
//! needs connections, and call `remove_all()` on shutdown. Initializers run
//! once against every instance the registry creates, before it connects.
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::connection::ConnectionManager;
use super::listener::invoke_isolated;
use super::transport::{Connector, WebSocketConnector};
use crate::config::utils::to_websocket_url;
use crate::config::{Community, Config};
use crate::errors::RealtimeResult;
use crate::logger::{self, LogTag};

type InitializerFn = dyn Fn(&ConnectionManager) + Send + Sync;

/// Hook run against each newly created connection. Identity is the handle, as for listeners.
#[derive(Clone)]
pub struct Initializer(Arc<InitializerFn>);

impl Initializer {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ConnectionManager) + Send + Sync + 'static,
    {
        Initializer(Arc::new(f))
    }
}

impl PartialEq for Initializer {
    fn eq(&self, other: &Self) -> bool {
        Arc::as_ptr(&self.0) as *const () == Arc::as_ptr(&other.0) as *const ()
    }
}

impl fmt::Debug for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Initializer({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

pub(crate) struct RegistryInner {
    config: Config,
    connector: Arc<dyn Connector>,
    instances: Mutex<HashMap<String, ConnectionManager>>,
    initializers: Mutex<Vec<Initializer>>,
}

impl RegistryInner {
    /// Forget `name` if it still maps to this manager
    pub(crate) fn evict(&self, name: &str, manager: &ConnectionManager) {
        let mut instances = self.instances.lock();
        if instances
            .get(name)
            .map_or(false, |existing| existing.same_instance(manager))
        {
            instances.remove(name);
        }
    }
}

#[derive(Clone)]
pub struct InstanceRegistry {
    inner: Arc<RegistryInner>,
}

impl InstanceRegistry {
    /// Registry whose connections use WebSockets
    pub fn new(config: Config) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    pub fn with_connector(config: Config, connector: Arc<dyn Connector>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                connector,
                instances: Mutex::new(HashMap::new()),
                initializers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Appended to the ordered initializer list. Returns false if already present.
    pub fn add_initializer(&self, initializer: Initializer) -> bool {
        let mut initializers = self.inner.initializers.lock();
        if initializers.contains(&initializer) {
            return false;
        }
        initializers.push(initializer);
        true
    }

    pub fn remove_initializer(&self, initializer: &Initializer) -> bool {
        let mut initializers = self.inner.initializers.lock();
        let before = initializers.len();
        initializers.retain(|i| i != initializer);
        initializers.len() != before
    }

    /// Existing connection for the community, or a new connected one at the
    /// address derived from the config
    pub fn get_instance(&self, community: &Community) -> RealtimeResult<ConnectionManager> {
        if let Some(existing) = self.instance(&community.xcap_community_name) {
            return Ok(existing);
        }
        let address = self.inner.config.realtime_address(community)?;
        self.get_instance_at(community, &address)
    }

    /// Like [`get_instance`](Self::get_instance) with an explicit address for a new instance
    pub fn get_instance_at(
        &self,
        community: &Community,
        address: &str,
    ) -> RealtimeResult<ConnectionManager> {
        let name = community.xcap_community_name.clone();
        let manager = {
            let mut instances = self.inner.instances.lock();
            if let Some(existing) = instances.get(&name) {
                return Ok(existing.clone());
            }
            let manager = ConnectionManager::create(
                community.clone(),
                to_websocket_url(address)?,
                &self.inner.config.realtime,
                self.inner.connector.clone(),
                Arc::downgrade(&self.inner),
            )?;
            // Stored before the initializers run so they can look the instance up
            instances.insert(name.clone(), manager.clone());
            manager
        };

        let initializers = self.inner.initializers.lock().clone();
        for (index, initializer) in initializers.iter().enumerate() {
            invoke_isolated(
                LogTag::Registry,
                &format!("Initializer #{} for {}", index, name),
                || (initializer.0)(&manager),
            );
        }

        logger::info(
            LogTag::Registry,
            &format!(
                "Created connection for {} ({} initializers)",
                name,
                initializers.len()
            ),
        );
        manager.connect();
        Ok(manager)
    }

    /// Lookup without creating
    pub fn instance(&self, name: &str) -> Option<ConnectionManager> {
        self.inner.instances.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close and forget one instance
    pub fn remove_instance(&self, name: &str) -> bool {
        let removed = self.inner.instances.lock().remove(name);
        match removed {
            Some(manager) => {
                manager.close();
                true
            }
            None => false,
        }
    }

    /// Close and forget every instance, returning how many were removed
    pub fn remove_all(&self) -> usize {
        let removed: Vec<ConnectionManager> = self
            .inner
            .instances
            .lock()
            .drain()
            .map(|(_, manager)| manager)
            .collect();
        for manager in &removed {
            manager.close();
        }
        if !removed.is_empty() {
            logger::info(
                LogTag::Registry,
                &format!("Removed {} connections", removed.len()),
            );
        }
        removed.len()
    }
}

impl fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.inner.instances.lock().keys().cloned().collect();
        names.sort();
        f.debug_struct("InstanceRegistry")
            .field("instances", &names)
            .field("initializers", &self.inner.initializers.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::connection::ConnectionState;
    use crate::realtime::transport::mock::MockConnector;

    fn registry(connector: &Arc<MockConnector>) -> InstanceRegistry {
        let mut config = Config::default();
        config.server = "https://api.example.com".to_string();
        config.context_path = "/api".to_string();
        InstanceRegistry::with_connector(config, connector.clone())
    }

    fn recording_initializer(log: &Arc<Mutex<Vec<String>>>, label: &str) -> Initializer {
        let log = log.clone();
        let label = label.to_string();
        Initializer::new(move |manager| {
            log.lock()
                .push(format!("{}:{}", label, manager.community().xcap_community_name))
        })
    }

    #[tokio::test]
    async fn test_get_instance_is_singleton_per_community() {
        let connector = MockConnector::new();
        let registry = registry(&connector);
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.add_initializer(recording_initializer(&log, "first"));
        registry.add_initializer(recording_initializer(&log, "second"));

        let community = Community::new(7, "acme", "acme-forum");
        let a = registry.get_instance(&community).unwrap();
        let b = registry.get_instance(&community).unwrap();

        assert!(a.same_instance(&b));
        assert_eq!(*log.lock(), vec!["first:acme", "second:acme"]);
        assert_eq!(connector.count(), 1);
        assert_eq!(
            connector.latest().address,
            "wss://api.example.com/api/acme-forum/realtime"
        );
        assert_eq!(a.state(), ConnectionState::Opening);
    }

    #[tokio::test]
    async fn test_explicit_address() {
        let connector = MockConnector::new();
        let registry = registry(&connector);

        let manager = registry
            .get_instance_at(&Community::new(1, "beta", "beta"), "http://localhost:8080/rt")
            .unwrap();
        assert_eq!(manager.address(), "ws://localhost:8080/rt");
        assert!(registry
            .get_instance_at(&Community::new(2, "gamma", "gamma"), "ftp://nowhere")
            .is_err());
        assert!(registry.instance("gamma").is_none());
    }

    #[tokio::test]
    async fn test_initializer_may_attach_listeners() {
        let connector = MockConnector::new();
        let registry = registry(&connector);
        let opened = Arc::new(Mutex::new(0usize));

        let initializer = {
            let opened = opened.clone();
            Initializer::new(move |manager| {
                let opened = opened.clone();
                manager
                    .add_listener(
                        crate::realtime::listener::Listener::new(move |_, _, _| *opened.lock() += 1),
                        Some(crate::realtime::types::EventType::SocketOpened),
                        None,
                        None,
                    )
                    .unwrap();
            })
        };
        assert!(registry.add_initializer(initializer.clone()));
        assert!(!registry.add_initializer(initializer.clone()));

        registry.get_instance(&Community::new(1, "acme", "acme")).unwrap();
        connector.latest().fire_open();
        assert_eq!(*opened.lock(), 1);

        assert!(registry.remove_initializer(&initializer));
        assert!(!registry.remove_initializer(&initializer));
        registry.get_instance(&Community::new(2, "beta", "beta")).unwrap();
        connector.latest().fire_open();
        assert_eq!(*opened.lock(), 1);
    }

    #[tokio::test]
    async fn test_panicking_initializer_does_not_block_others() {
        let connector = MockConnector::new();
        let registry = registry(&connector);
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.add_initializer(Initializer::new(|_| panic!("broken initializer")));
        registry.add_initializer(recording_initializer(&log, "after"));

        registry.get_instance(&Community::new(1, "acme", "acme")).unwrap();
        assert_eq!(*log.lock(), vec!["after:acme"]);
        assert_eq!(connector.count(), 1);
    }

    #[tokio::test]
    async fn test_remove_instance_closes_and_evicts() {
        let connector = MockConnector::new();
        let registry = registry(&connector);
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.add_initializer(recording_initializer(&log, "init"));
        let community = Community::new(1, "acme", "acme");

        let first = registry.get_instance(&community).unwrap();
        assert!(registry.remove_instance("acme"));
        assert!(!registry.remove_instance("acme"));
        assert_eq!(first.state(), ConnectionState::Closed);
        assert!(connector.latest().was_closed());

        let second = registry.get_instance(&community).unwrap();
        assert!(!first.same_instance(&second));
        assert_eq!(log.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_close_evicts_from_registry() {
        let connector = MockConnector::new();
        let registry = registry(&connector);

        let manager = registry.get_instance(&Community::new(1, "acme", "acme")).unwrap();
        assert_eq!(registry.len(), 1);
        manager.close();
        assert!(registry.instance("acme").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_remove_all() {
        let connector = MockConnector::new();
        let registry = registry(&connector);

        let a = registry.get_instance(&Community::new(1, "acme", "acme")).unwrap();
        let b = registry.get_instance(&Community::new(2, "beta", "beta")).unwrap();

        assert_eq!(registry.remove_all(), 2);
        assert_eq!(registry.remove_all(), 0);
        assert_eq!(a.state(), ConnectionState::Closed);
        assert_eq!(b.state(), ConnectionState::Closed);
    }
}
