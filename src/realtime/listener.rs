//! Listener handles
//!
//! Closures have no identity of their own, so each handle wraps an `Arc` and
//! two handles are the same listener when they share the allocation. Clone a
//! handle to register it in several places and to remove it later.
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::types::{EventType, Message, RawEvent, RealTimePayload};
use crate::logger::{self, LogTag};

fn same_allocation<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

type ListenerFn = dyn Fn(EventType, Option<&RawEvent>, Option<&Message>) + Send + Sync;
type RealTimeListenerFn = dyn Fn(&Message, &RealTimePayload) + Send + Sync;

/// Receives socket lifecycle events and raw messages
#[derive(Clone)]
pub struct Listener(Arc<ListenerFn>);

impl Listener {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(EventType, Option<&RawEvent>, Option<&Message>) + Send + Sync + 'static,
    {
        Listener(Arc::new(f))
    }

    pub(crate) fn call(&self, event_type: EventType, raw: Option<&RawEvent>, message: Option<&Message>) {
        (self.0)(event_type, raw, message)
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        same_allocation(&self.0, &other.0)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// Receives decoded object lifecycle events for a subscription or reference
#[derive(Clone)]
pub struct RealTimeListener(Arc<RealTimeListenerFn>);

impl RealTimeListener {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Message, &RealTimePayload) + Send + Sync + 'static,
    {
        RealTimeListener(Arc::new(f))
    }

    pub(crate) fn call(&self, message: &Message, payload: &RealTimePayload) {
        (self.0)(message, payload)
    }
}

impl PartialEq for RealTimeListener {
    fn eq(&self, other: &Self) -> bool {
        same_allocation(&self.0, &other.0)
    }
}

impl fmt::Debug for RealTimeListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RealTimeListener({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// Run one callback; a panic is logged and reported as `false` instead of unwinding
/// into the dispatch loop.
pub(crate) fn invoke_isolated<F: FnOnce()>(tag: LogTag, what: &str, f: F) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(cause) => {
            logger::error(tag, &format!("{} panicked: {}", what, panic_reason(&*cause)));
            false
        }
    }
}

fn panic_reason(cause: &(dyn Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
