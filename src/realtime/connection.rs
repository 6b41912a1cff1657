//! Connection manager
//!
//! One instance per community. It owns a single transport, at most one
//! pending reconnect timer and the outbound queue, and forwards transport
//! events to its [`BroadcastRouter`].
//!
//! Lifecycle: `Closed -> Opening -> Open`, then either `Closed` (explicit
//! `close()`, terminal) or `ReconnectScheduled -> Opening` after an abnormal
//! close or an error. Each transport is tagged with a generation so events
//! from a replaced transport are ignored.
use parking_lot::Mutex;
use serde_json::json;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::instances::RegistryInner;
use super::keys::{reference_key, Subscription};
use super::listener::{Listener, RealTimeListener};
use super::queue::{validate_message, SendQueue};
use super::router::BroadcastRouter;
use super::transport::{Connector, EventSink, Transport, TransportEvent};
use super::types::{
    EventType, Message, MessageType, RawEvent, RealTimeComponent, REALTIME_COMPONENT,
    REALTIME_CONTEXT,
};
use crate::arguments::is_debug_realtime_enabled;
use crate::config::{Community, RealtimeConfig};
use crate::errors::{RealtimeError, RealtimeResult};
use crate::logger::{self, LogTag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Opening,
    Open,
    ReconnectScheduled,
}

struct LinkState {
    transport: Option<Arc<dyn Transport>>,
    generation: u64,
    state: ConnectionState,
    /// Set by `connect()`, cleared by `close()`
    intentionally_open: bool,
    /// `close()` was called; nothing reconnects after this
    terminated: bool,
    /// The current generation already reported close or error
    terminal_seen: bool,
    reconnect_delay: Duration,
    reconnect_timer: Option<JoinHandle<()>>,
}

struct Inner {
    community: Community,
    address: String,
    settings: RealtimeConfig,
    connector: Arc<dyn Connector>,
    runtime: Handle,
    router: BroadcastRouter,
    queue: SendQueue,
    link: Mutex<LinkState>,
    registry: Weak<RegistryInner>,
}

/// Cheap to clone; clones share the same connection
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Build an unconnected manager. Must be called inside a tokio runtime,
    /// which drives the reconnect and flush timers.
    pub fn new(
        community: Community,
        address: String,
        settings: &RealtimeConfig,
        connector: Arc<dyn Connector>,
    ) -> RealtimeResult<Self> {
        Self::create(community, address, settings, connector, Weak::new())
    }

    pub(crate) fn create(
        community: Community,
        address: String,
        settings: &RealtimeConfig,
        connector: Arc<dyn Connector>,
        registry: Weak<RegistryInner>,
    ) -> RealtimeResult<Self> {
        let runtime = Handle::try_current().map_err(|e| RealtimeError::NoRuntime(e.to_string()))?;
        let base_delay = Duration::from_millis(settings.reconnect_base_delay_ms);

        Ok(Self {
            inner: Arc::new(Inner {
                community,
                address,
                settings: settings.clone(),
                connector,
                runtime,
                router: BroadcastRouter::new(),
                queue: SendQueue::new(),
                link: Mutex::new(LinkState {
                    transport: None,
                    generation: 0,
                    state: ConnectionState::Closed,
                    intentionally_open: false,
                    terminated: false,
                    terminal_seen: false,
                    reconnect_delay: base_delay,
                    reconnect_timer: None,
                }),
                registry,
            }),
        })
    }

    /// Open the transport. Does nothing while a transport exists, while an
    /// attempt is in flight or after `close()`.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Terminal. Cancels the reconnect timer, closes the transport, discards
    /// queued messages and evicts the instance from its registry.
    pub fn close(&self) {
        let (transport, timer) = {
            let mut link = self.inner.link.lock();
            if link.terminated {
                return;
            }
            link.terminated = true;
            link.intentionally_open = false;
            link.state = ConnectionState::Closed;
            (link.transport.take(), link.reconnect_timer.take())
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(transport) = transport {
            transport.close();
        }
        let dropped = self.inner.queue.clear();

        logger::info(
            LogTag::Realtime,
            &format!(
                "Closed connection for {} ({} queued messages dropped)",
                self.inner.community.xcap_community_name, dropped
            ),
        );

        if let Some(registry) = self.inner.registry.upgrade() {
            registry.evict(&self.inner.community.xcap_community_name, self);
        }
    }

    /// Validate and queue a message. Before the first `connect()` and after
    /// `close()` a valid message is silently dropped.
    pub fn send(&self, message: Message) -> RealtimeResult<()> {
        validate_message(&message)?;

        if !self.inner.link.lock().intentionally_open {
            if is_debug_realtime_enabled() {
                logger::debug(
                    LogTag::Realtime,
                    &format!(
                        "Not connected, dropping {:?} for {:?}",
                        message.message_type, message.community_context
                    ),
                );
            }
            return Ok(());
        }

        self.inner.queue.enqueue(message)?;
        self.inner.flush();
        Ok(())
    }

    /// PING on the fixed realtime component and context
    pub fn ping(&self) -> RealtimeResult<()> {
        self.send(self.control_message(MessageType::Ping))
    }

    pub fn add_listener(
        &self,
        listener: Listener,
        event_type: Option<EventType>,
        community_context: Option<&str>,
        component_name: Option<&str>,
    ) -> RealtimeResult<bool> {
        self.inner
            .router
            .add_listener(listener, event_type, community_context, component_name)
    }

    pub fn remove_listener(
        &self,
        listener: &Listener,
        event_type: Option<EventType>,
        community_context: Option<&str>,
        component_name: Option<&str>,
    ) -> RealtimeResult<bool> {
        self.inner
            .router
            .remove_listener(listener, event_type, community_context, component_name)
    }

    /// Shorthand for a `ReceiveMessage` listener
    pub fn add_message_listener(
        &self,
        listener: Listener,
        community_context: Option<&str>,
        component_name: Option<&str>,
    ) -> RealtimeResult<bool> {
        self.add_listener(
            listener,
            Some(EventType::ReceiveMessage),
            community_context,
            component_name,
        )
    }

    /// Register the listener and send SUBSCRIBE. Returns false if the listener
    /// was already registered for this subscription; SUBSCRIBE is sent regardless.
    pub fn subscribe(
        &self,
        subscription: &Subscription,
        listener: RealTimeListener,
    ) -> RealtimeResult<bool> {
        let message = self.subscription_message(MessageType::Subscribe, subscription);
        validate_message(&message)?;

        let added = self
            .inner
            .router
            .subscriptions()
            .add_by_subscription(subscription, listener);
        self.send(message)?;
        Ok(added)
    }

    /// Remove the listener. UNSUBSCRIBE goes out once nobody listens to the key.
    pub fn unsubscribe(
        &self,
        subscription: &Subscription,
        listener: &RealTimeListener,
    ) -> RealtimeResult<bool> {
        let registry = self.inner.router.subscriptions();
        let removed = registry.remove_by_subscription(subscription, listener);
        if removed && !registry.has_subscription_key(&subscription.key()) {
            self.send(self.subscription_message(MessageType::Unsubscribe, subscription))?;
        }
        Ok(removed)
    }

    /// Register the listener under each obfuscated reference and send one batch SUBSCRIBE.
    /// Returns how many registrations were new.
    pub fn subscribe_multiple(
        &self,
        component: RealTimeComponent,
        context: &str,
        references: &[String],
        listener: RealTimeListener,
    ) -> RealtimeResult<usize> {
        let message = self.batch_message(MessageType::Subscribe, component, context, references);
        validate_message(&message)?;

        let registry = self.inner.router.subscriptions();
        let mut added = 0;
        for reference in references {
            if registry.add_by_reference(component, reference, listener.clone()) {
                added += 1;
            }
        }
        self.send(message)?;
        Ok(added)
    }

    /// Returns how many registrations were removed
    pub fn unsubscribe_multiple(
        &self,
        component: RealTimeComponent,
        context: &str,
        references: &[String],
        listener: &RealTimeListener,
    ) -> RealtimeResult<usize> {
        let registry = self.inner.router.subscriptions();
        let mut removed = 0;
        for reference in references {
            if registry.remove_by_reference(component, reference, listener) {
                removed += 1;
            }
        }

        let released: Vec<String> = references
            .iter()
            .filter(|reference| {
                !registry.has_reference_key(&reference_key(component, reference))
            })
            .cloned()
            .collect();
        if removed > 0 && !released.is_empty() {
            self.send(self.batch_message(MessageType::Unsubscribe, component, context, &released))?;
        }
        Ok(removed)
    }

    /// Drop every listener for a context and send UNSUBSCRIBE_ALL. Returns the number removed.
    pub fn unsubscribe_all(&self, context: &str) -> RealtimeResult<usize> {
        let message = self
            .control_message(MessageType::UnsubscribeAll)
            .with_payload(json!({ "context": context }));
        validate_message(&message)?;

        let removed = self.inner.router.subscriptions().remove_all(Some(context));
        self.send(message)?;
        Ok(removed)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.link.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Delay the next reconnect will wait
    pub fn next_reconnect_delay(&self) -> Duration {
        self.inner.link.lock().reconnect_delay
    }

    pub fn queued_messages(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn router(&self) -> &BroadcastRouter {
        &self.inner.router
    }

    pub fn community(&self) -> &Community {
        &self.inner.community
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// True when both handles refer to the same connection
    pub fn same_instance(&self, other: &ConnectionManager) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn realtime_context(&self) -> String {
        format!(
            "{}:{}",
            self.inner.community.xcap_community_name, REALTIME_CONTEXT
        )
    }

    fn control_message(&self, message_type: MessageType) -> Message {
        Message::new(self.realtime_context(), REALTIME_COMPONENT, message_type)
    }

    fn subscription_message(&self, message_type: MessageType, subscription: &Subscription) -> Message {
        self.control_message(message_type).with_payload(json!({
            "function": subscription.component(),
            "context": subscription.context(),
            "referenceId": subscription.reference_id(),
        }))
    }

    fn batch_message(
        &self,
        message_type: MessageType,
        component: RealTimeComponent,
        context: &str,
        references: &[String],
    ) -> Message {
        self.control_message(message_type).with_payload(json!({
            "function": component,
            "context": context,
            "references": references,
        }))
    }
}

impl PartialEq for ConnectionManager {
    fn eq(&self, other: &Self) -> bool {
        self.same_instance(other)
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("community", &self.inner.community.xcap_community_name)
            .field("address", &self.inner.address)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// TRANSPORT EVENT HANDLING
// ============================================================================

impl Inner {
    fn base_delay(&self) -> Duration {
        Duration::from_millis(self.settings.reconnect_base_delay_ms)
    }

    fn connect(self: &Arc<Self>) {
        let generation = {
            let mut link = self.link.lock();
            if link.terminated {
                if is_debug_realtime_enabled() {
                    logger::debug(LogTag::Realtime, "connect() after close() ignored");
                }
                return;
            }
            if link.transport.is_some() || link.state == ConnectionState::Opening {
                return;
            }
            if let Some(timer) = link.reconnect_timer.take() {
                timer.abort();
            }
            link.generation += 1;
            link.state = ConnectionState::Opening;
            link.intentionally_open = true;
            link.terminal_seen = false;
            link.generation
        };

        logger::info(
            LogTag::Realtime,
            &format!(
                "Connecting {} to {}",
                self.community.xcap_community_name, self.address
            ),
        );
        self.router.broadcast(EventType::SocketOpening, None, None);

        match self.connector.open(&self.address, self.event_sink(generation)) {
            Ok(transport) => {
                let mut link = self.link.lock();
                if link.generation == generation && !link.terminated {
                    link.transport = Some(transport);
                } else {
                    drop(link);
                    transport.close();
                }
            }
            Err(e) => self.handle_error(generation, e.to_string()),
        }
    }

    fn event_sink(self: &Arc<Self>, generation: u64) -> EventSink {
        let inner = Arc::downgrade(self);
        Arc::new(move |event: TransportEvent| {
            if let Some(inner) = inner.upgrade() {
                inner.handle_event(generation, event);
            }
        })
    }

    fn handle_event(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.handle_open(generation),
            TransportEvent::Message(text) => self.handle_message(generation, text),
            TransportEvent::Closed { code, reason } => self.handle_close(generation, code, reason),
            TransportEvent::Error(error) => self.handle_error(generation, error),
        }
    }

    fn is_live(&self, link: &LinkState, generation: u64) -> bool {
        link.generation == generation && !link.terminal_seen
    }

    fn handle_open(self: &Arc<Self>, generation: u64) {
        {
            let mut link = self.link.lock();
            if !self.is_live(&link, generation) || link.terminated {
                return;
            }
            link.state = ConnectionState::Open;
            link.reconnect_delay = self.base_delay();
        }

        logger::info(
            LogTag::Realtime,
            &format!("Connected {}", self.community.xcap_community_name),
        );
        self.router.broadcast(EventType::SocketOpened, None, None);
        self.flush();
    }

    fn handle_message(&self, generation: u64, text: String) {
        if !self.is_live(&self.link.lock(), generation) {
            return;
        }

        let message = match Message::from_wire(&text) {
            Ok(message) => message,
            Err(e) => {
                logger::warning(
                    LogTag::Realtime,
                    &format!("Ignoring malformed message: {}", e),
                );
                return;
            }
        };

        if is_debug_realtime_enabled() {
            logger::debug(
                LogTag::Realtime,
                &format!(
                    "Received {:?} for {:?}",
                    message.message_type, message.community_context
                ),
            );
        }
        let raw = RawEvent::Text(text);
        self.router
            .broadcast(EventType::ReceiveMessage, Some(&raw), Some(&message));
    }

    fn handle_close(self: &Arc<Self>, generation: u64, code: Option<u16>, reason: String) {
        let reconnect = {
            let mut link = self.link.lock();
            if !self.is_live(&link, generation) {
                return;
            }
            link.terminal_seen = true;
            let reconnect = link.intentionally_open && !link.terminated;
            // Listeners of the close broadcast already see the next state
            link.state = if reconnect {
                ConnectionState::ReconnectScheduled
            } else {
                ConnectionState::Closed
            };
            reconnect
        };

        logger::info(
            LogTag::Realtime,
            &format!(
                "Socket for {} closed (code {:?}, reason '{}')",
                self.community.xcap_community_name, code, reason
            ),
        );
        let raw = RawEvent::Closed { code, reason };
        self.router.broadcast(EventType::SocketClosed, Some(&raw), None);

        if reconnect {
            self.schedule_reconnect();
        }
    }

    fn handle_error(self: &Arc<Self>, generation: u64, error: String) {
        let reconnect = {
            let mut link = self.link.lock();
            if !self.is_live(&link, generation) {
                return;
            }
            link.terminal_seen = true;
            let reconnect = link.intentionally_open && !link.terminated;
            link.state = if reconnect {
                ConnectionState::ReconnectScheduled
            } else {
                ConnectionState::Closed
            };
            reconnect
        };

        logger::error(
            LogTag::Realtime,
            &format!(
                "Socket error for {}: {}",
                self.community.xcap_community_name, error
            ),
        );
        self.router
            .broadcast(EventType::SocketError, Some(&RawEvent::Error(error.clone())), None);
        let raw = RawEvent::Closed {
            code: None,
            reason: error,
        };
        self.router.broadcast(EventType::SocketClosed, Some(&raw), None);

        if reconnect {
            self.schedule_reconnect();
        }
    }

    /// Arm the reconnect timer with the current delay and double the delay for next time
    fn schedule_reconnect(self: &Arc<Self>) {
        let mut link = self.link.lock();
        if link.terminated {
            return;
        }
        if let Some(timer) = link.reconnect_timer.take() {
            timer.abort();
        }

        let delay = link.reconnect_delay;
        link.reconnect_delay = delay.saturating_mul(2);
        link.state = ConnectionState::ReconnectScheduled;

        let inner = Arc::downgrade(self);
        link.reconnect_timer = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                inner.reconnect();
            }
        }));

        logger::info(
            LogTag::Realtime,
            &format!(
                "Reconnecting {} in {}ms",
                self.community.xcap_community_name,
                delay.as_millis()
            ),
        );
    }

    fn reconnect(self: &Arc<Self>) {
        let old = {
            let mut link = self.link.lock();
            if link.terminated {
                return;
            }
            // This task is the timer; nothing to abort
            link.reconnect_timer = None;
            link.transport.take()
        };
        if let Some(old) = old {
            old.close();
        }
        self.connect();
    }

    fn flush(self: &Arc<Self>) {
        let transport = self.link.lock().transport.clone();
        if self.queue.flush(transport.as_deref()).needs_retry() {
            self.arm_flush_poll();
        }
    }

    /// Recheck the queue every `flush_poll_interval_ms` until it drains
    fn arm_flush_poll(self: &Arc<Self>) {
        if !self.queue.try_arm_poll() {
            return;
        }

        let inner = Arc::downgrade(self);
        let interval = Duration::from_millis(self.settings.flush_poll_interval_ms);
        self.runtime.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = inner.upgrade() else {
                    return;
                };

                let (terminated, transport) = {
                    let link = inner.link.lock();
                    (link.terminated, link.transport.clone())
                };
                if terminated {
                    inner.queue.disarm_poll();
                    return;
                }
                if inner.queue.flush(transport.as_deref()).needs_retry() {
                    continue;
                }

                inner.queue.disarm_poll();
                // A send may have enqueued between the flush and the disarm
                if inner.queue.is_empty() || !inner.queue.try_arm_poll() {
                    return;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::transport::mock::MockConnector;
    use parking_lot::Mutex as PlMutex;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager(connector: &Arc<MockConnector>) -> ConnectionManager {
        ConnectionManager::new(
            Community::new(1, "acme", "acme"),
            "ws://example.test/acme/realtime".to_string(),
            &RealtimeConfig::default(),
            connector.clone(),
        )
        .unwrap()
    }

    fn sent_types(connector: &MockConnector) -> Vec<String> {
        connector
            .latest()
            .sent()
            .iter()
            .map(|text| {
                let wire: Value = serde_json::from_str(text).unwrap();
                wire["messageType"].as_str().unwrap().to_string()
            })
            .collect()
    }

    fn lifecycle_wire(reference_id: i64) -> String {
        Message::new("acme:comments", "comments", MessageType::ObjectCreated)
            .with_payload(json!({
                "communityContext": "acme:comments",
                "component": "comment",
                "type": "comment",
                "id": 9,
                "userId": 3,
                "referenceId": reference_id,
            }))
            .to_wire()
            .unwrap()
    }

    fn recording_listener(events: &Arc<PlMutex<Vec<EventType>>>) -> Listener {
        let events = events.clone();
        Listener::new(move |event_type, _, _| events.lock().push(event_type))
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_then_resets_after_open() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        manager.connect();

        for expected in [1000u64, 2000, 4000, 8000] {
            assert_eq!(manager.next_reconnect_delay(), Duration::from_millis(expected));
            connector.latest().fire_close(1006);
            assert_eq!(manager.state(), ConnectionState::ReconnectScheduled);
            tokio::time::sleep(Duration::from_millis(expected + 1)).await;
        }
        assert_eq!(connector.count(), 5);

        let opened = connector.opened_at();
        for (i, expected) in [1000u64, 2000, 4000, 8000].iter().enumerate() {
            let gap = opened[i + 1] - opened[i];
            assert!(gap >= Duration::from_millis(*expected));
            assert!(gap < Duration::from_millis(expected + 10));
        }
        assert_eq!(manager.next_reconnect_delay(), Duration::from_millis(16000));

        connector.latest().fire_open();
        assert!(manager.is_open());
        assert_eq!(manager.next_reconnect_delay(), Duration::from_millis(1000));

        connector.latest().fire_close(1006);
        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(connector.count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let connector = MockConnector::new();
        let manager = manager(&connector);

        manager.connect();
        manager.connect();
        assert_eq!(connector.count(), 1);
        assert_eq!(manager.state(), ConnectionState::Opening);

        connector.latest().fire_open();
        manager.connect();
        assert_eq!(connector.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_close_prevents_reconnect() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        manager.connect();
        let transport = connector.latest();
        transport.fire_open();

        manager.close();
        assert!(transport.was_closed());
        assert_eq!(manager.state(), ConnectionState::Closed);

        transport.fire_close(1006);
        transport.fire_error("late error");
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.count(), 1);

        manager.connect();
        assert_eq!(connector.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending_reconnect() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        manager.connect();
        connector.latest().fire_error("reset");
        assert_eq!(manager.state(), ConnectionState::ReconnectScheduled);

        manager.close();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(connector.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_sequence_and_stale_transport() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        let events = Arc::new(PlMutex::new(Vec::new()));
        manager
            .add_listener(recording_listener(&events), None, None, None)
            .unwrap();

        manager.connect();
        let first = connector.latest();
        first.fire_open();
        first.fire_error("connection reset");
        // Only the first terminal event counts
        first.fire_close(1006);

        assert_eq!(
            *events.lock(),
            vec![
                EventType::SocketOpening,
                EventType::SocketOpened,
                EventType::SocketError,
                EventType::SocketClosed,
            ]
        );

        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(connector.count(), 2);
        assert!(first.was_closed());

        events.lock().clear();
        first.fire_open();
        first.fire_message(&lifecycle_wire(42));
        assert!(events.lock().is_empty());
        assert_eq!(manager.state(), ConnectionState::Opening);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_connection_is_retried() {
        let connector = MockConnector::new();
        connector.set_refuse(true);
        let manager = manager(&connector);

        manager.connect();
        assert_eq!(manager.state(), ConnectionState::ReconnectScheduled);

        connector.set_refuse(false);
        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(connector.count(), 1);
        assert_eq!(connector.opened_at().len(), 2);
        assert_eq!(manager.state(), ConnectionState::Opening);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_before_connect_is_dropped() {
        let connector = MockConnector::new();
        let manager = manager(&connector);

        manager.ping().unwrap();
        assert_eq!(manager.queued_messages(), 0);

        manager.connect();
        connector.latest().fire_open();
        assert!(connector.latest().sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_validates_before_anything_else() {
        let connector = MockConnector::new();
        let manager = manager(&connector);

        let bad = Message::new("undefined:comments", "comments", MessageType::Ping);
        assert!(matches!(
            manager.send(bad),
            Err(RealtimeError::InvalidCommunityContext(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_opening_is_flushed_on_open() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        manager.connect();

        manager.ping().unwrap();
        manager.ping().unwrap();
        assert_eq!(manager.queued_messages(), 2);

        connector.latest().fire_open();
        assert_eq!(manager.queued_messages(), 0);
        assert_eq!(sent_types(&connector), vec!["PING", "PING"]);

        let wire: Value = serde_json::from_str(&connector.latest().sent()[0]).unwrap();
        assert_eq!(wire["communityContext"], "acme:realtime");
        assert_eq!(wire["componentName"], "realtime");
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_poll_picks_up_open_transport() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        manager.connect();
        manager.ping().unwrap();

        // Open without an Opened event: only the poll loop can notice
        connector.latest().set_open(true);
        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(manager.queued_messages(), 1);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(manager.queued_messages(), 0);
        assert_eq!(sent_types(&connector), vec!["PING"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_scenario() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        manager.connect();
        connector.latest().fire_open();

        let calls = Arc::new(AtomicUsize::new(0));
        let listener = {
            let calls = calls.clone();
            RealTimeListener::new(move |_, payload| {
                assert_eq!(payload.reference_id, 42);
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        let subscription = Subscription::comments("comments", 42).unwrap();

        assert!(manager.subscribe(&subscription, listener.clone()).unwrap());
        let wire: Value = serde_json::from_str(&connector.latest().sent()[0]).unwrap();
        assert_eq!(wire["messageType"], "SUBSCRIBE");
        let payload: Value = serde_json::from_str(wire["payload"].as_str().unwrap()).unwrap();
        assert_eq!(
            payload,
            json!({"function": "comment", "context": "comments", "referenceId": 42})
        );

        connector.latest().fire_message(&lifecycle_wire(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(manager.unsubscribe(&subscription, &listener).unwrap());
        connector.latest().fire_message(&lifecycle_wire(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sent_types(&connector), vec!["SUBSCRIBE", "UNSUBSCRIBE"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_waits_for_last_listener() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        manager.connect();
        connector.latest().fire_open();

        let subscription = Subscription::comments("comments", 42).unwrap();
        let first = RealTimeListener::new(|_, _| {});
        let second = RealTimeListener::new(|_, _| {});
        manager.subscribe(&subscription, first.clone()).unwrap();
        manager.subscribe(&subscription, second.clone()).unwrap();

        manager.unsubscribe(&subscription, &first).unwrap();
        assert_eq!(sent_types(&connector), vec!["SUBSCRIBE", "SUBSCRIBE"]);
        manager.unsubscribe(&subscription, &second).unwrap();
        assert_eq!(
            sent_types(&connector),
            vec!["SUBSCRIBE", "SUBSCRIBE", "UNSUBSCRIBE"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_multiple_by_reference() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        manager.connect();
        connector.latest().fire_open();

        let calls = Arc::new(AtomicUsize::new(0));
        let listener = {
            let calls = calls.clone();
            RealTimeListener::new(move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        let references = vec!["c1".to_string(), "c2".to_string()];
        assert_eq!(
            manager
                .subscribe_multiple(RealTimeComponent::Comment, "comments", &references, listener.clone())
                .unwrap(),
            2
        );

        let wire: Value = serde_json::from_str(&connector.latest().sent()[0]).unwrap();
        let payload: Value = serde_json::from_str(wire["payload"].as_str().unwrap()).unwrap();
        assert_eq!(payload["references"], json!(["c1", "c2"]));

        let by_reference = Message::new("acme:comments", "comments", MessageType::ObjectModified)
            .with_payload(json!({
                "communityContext": "other:elsewhere",
                "component": "comment",
                "type": "comment",
                "id": 9,
                "obfuscatedReference": "c2",
                "userId": 3,
                "referenceId": 7,
            }))
            .to_wire()
            .unwrap();
        connector.latest().fire_message(&by_reference);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(
            manager
                .unsubscribe_multiple(RealTimeComponent::Comment, "comments", &references, &listener)
                .unwrap(),
            2
        );
        connector.latest().fire_message(&by_reference);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sent_types(&connector), vec!["SUBSCRIBE", "UNSUBSCRIBE"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_all_by_context() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        manager.connect();
        connector.latest().fire_open();

        let comments = Subscription::comments("comments", 42).unwrap();
        let blog = Subscription::blog("blog", 42).unwrap();
        manager.subscribe(&comments, RealTimeListener::new(|_, _| {})).unwrap();
        manager.subscribe(&comments, RealTimeListener::new(|_, _| {})).unwrap();
        manager.subscribe(&blog, RealTimeListener::new(|_, _| {})).unwrap();

        assert_eq!(manager.unsubscribe_all("comments").unwrap(), 2);
        assert!(manager.router().subscriptions().has_subscription_key(&blog.key()));
        assert_eq!(manager.router().subscriptions().len(), 1);

        let last = connector.latest().sent().last().cloned().unwrap();
        let wire: Value = serde_json::from_str(&last).unwrap();
        assert_eq!(wire["messageType"], "UNSUBSCRIBE_ALL");
        assert_eq!(wire["payload"], json!({"context": "comments"}).to_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_is_not_open_during_close_broadcasts() {
        let connector = MockConnector::new();
        let manager = manager(&connector);
        let seen = Arc::new(PlMutex::new(Vec::new()));
        let listener = {
            let seen = seen.clone();
            let manager = manager.clone();
            Listener::new(move |event_type, _, _| seen.lock().push((event_type, manager.state())))
        };
        manager
            .add_listener(listener.clone(), Some(EventType::SocketClosed), None, None)
            .unwrap();
        manager
            .add_listener(listener.clone(), Some(EventType::SocketError), None, None)
            .unwrap();

        manager.connect();
        connector.latest().fire_open();
        connector.latest().fire_close(1006);
        assert_eq!(
            *seen.lock(),
            vec![(EventType::SocketClosed, ConnectionState::ReconnectScheduled)]
        );

        seen.lock().clear();
        tokio::time::sleep(Duration::from_millis(1001)).await;
        connector.latest().fire_open();
        connector.latest().fire_error("reset");
        assert_eq!(
            *seen.lock(),
            vec![
                (EventType::SocketError, ConnectionState::ReconnectScheduled),
                (EventType::SocketClosed, ConnectionState::ReconnectScheduled),
            ]
        );

        // Break the manager -> router -> listener -> manager cycle
        manager
            .remove_listener(&listener, Some(EventType::SocketClosed), None, None)
            .unwrap();
        manager
            .remove_listener(&listener, Some(EventType::SocketError), None, None)
            .unwrap();
    }

    #[test]
    fn test_new_requires_runtime() {
        let connector = MockConnector::new();
        let result = ConnectionManager::new(
            Community::new(1, "acme", "acme"),
            "ws://example.test/".to_string(),
            &RealtimeConfig::default(),
            connector,
        );
        assert!(matches!(result, Err(RealtimeError::NoRuntime(_))));
    }
}
