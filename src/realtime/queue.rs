//! Outbound message queue
//!
//! Messages are validated when they are sent, buffered in FIFO order and
//! written out by `flush` once the transport is open. The connection owns the
//! poll loop that retries a flush while the transport is not ready; the
//! `poll_armed` flag keeps that loop unique.
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use super::keys::split_community_context;
use super::transport::Transport;
use super::types::Message;
use crate::arguments::is_debug_queue_enabled;
use crate::errors::{RealtimeError, RealtimeResult};
use crate::logger::{self, LogTag};

/// Reject messages the server cannot route
pub fn validate_message(message: &Message) -> RealtimeResult<()> {
    if message.message_type.is_none() {
        return Err(RealtimeError::InvalidMessage(
            "messageType is required".to_string(),
        ));
    }
    if message.component_name.as_deref().map_or(true, str::is_empty) {
        return Err(RealtimeError::InvalidMessage(
            "componentName is required".to_string(),
        ));
    }
    match message.community_context.as_deref() {
        None => Err(RealtimeError::InvalidCommunityContext(None)),
        Some(community_context) => split_community_context(community_context).map(|_| ()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued
    Idle,
    /// Every queued message was written
    Flushed(usize),
    /// No open transport; messages stay queued
    NotReady { pending: usize },
    /// A write failed; the failed message and everything after it stay queued
    Failed { sent: usize, pending: usize },
}

impl FlushOutcome {
    /// True when messages are still waiting for the transport
    pub fn needs_retry(&self) -> bool {
        matches!(self, FlushOutcome::NotReady { .. } | FlushOutcome::Failed { .. })
    }
}

#[derive(Debug, Default)]
pub struct SendQueue {
    buffer: Mutex<VecDeque<Message>>,
    /// Held for a whole flush so concurrent flushes cannot reorder messages
    flush_lock: Mutex<()>,
    poll_armed: AtomicBool,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and append. Returns the queue length after the append.
    pub fn enqueue(&self, message: Message) -> RealtimeResult<usize> {
        validate_message(&message)?;
        let mut buffer = self.buffer.lock();
        buffer.push_back(message);
        Ok(buffer.len())
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Drop everything queued, returning how many messages were discarded
    pub fn clear(&self) -> usize {
        let mut buffer = self.buffer.lock();
        let dropped = buffer.len();
        buffer.clear();
        dropped
    }

    /// Write every queued message, oldest first, if the transport is open
    pub fn flush(&self, transport: Option<&dyn Transport>) -> FlushOutcome {
        let _guard = self.flush_lock.lock();

        let pending = self.len();
        if pending == 0 {
            return FlushOutcome::Idle;
        }
        let transport = match transport {
            Some(t) if t.is_open() => t,
            _ => return FlushOutcome::NotReady { pending },
        };

        let mut batch = std::mem::take(&mut *self.buffer.lock());
        let mut sent = 0;
        while let Some(message) = batch.pop_front() {
            let text = match message.to_wire() {
                Ok(text) => text,
                Err(e) => {
                    logger::error(
                        LogTag::Queue,
                        &format!("Dropping unserializable message: {}", e),
                    );
                    continue;
                }
            };

            if let Err(e) = transport.send_text(text) {
                logger::warning(
                    LogTag::Queue,
                    &format!("Send failed after {} messages: {}", sent, e),
                );
                batch.push_front(message);
                let mut buffer = self.buffer.lock();
                batch.extend(buffer.drain(..));
                *buffer = batch;
                return FlushOutcome::Failed {
                    sent,
                    pending: buffer.len(),
                };
            }
            sent += 1;
        }

        if is_debug_queue_enabled() {
            logger::debug(LogTag::Queue, &format!("Flushed {} messages", sent));
        }
        FlushOutcome::Flushed(sent)
    }

    /// Claim the poll loop. False if one is already armed.
    pub(crate) fn try_arm_poll(&self) -> bool {
        !self.poll_armed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn disarm_poll(&self) {
        self.poll_armed.store(false, Ordering::SeqCst);
    }
}
