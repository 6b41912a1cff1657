//! Socket transport
//!
//! The connection manager talks to the network through two small traits so
//! it can be driven by a real WebSocket or by a test double:
//! - `Connector` opens a transport for an address and hands it an event sink
//! - `Transport` reports whether it is open, writes text frames and closes
//!
//! A transport reports `Opened` at most once and exactly one terminal event
//! (`Closed` or `Error`) at the end of its life.
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::arguments::is_debug_transport_enabled;
use crate::errors::{RealtimeError, RealtimeResult};
use crate::logger::{self, LogTag};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

/// Callback a transport reports its events to
pub type EventSink = Arc<dyn Fn(TransportEvent) + Send + Sync>;

pub trait Transport: Send + Sync {
    fn is_open(&self) -> bool;

    /// Queue a text frame for writing. Fails if the transport is not open.
    fn send_text(&self, text: String) -> RealtimeResult<()>;

    /// Start closing. Never fails; the terminal event follows asynchronously.
    fn close(&self);
}

pub trait Connector: Send + Sync {
    fn open(&self, address: &str, events: EventSink) -> RealtimeResult<Arc<dyn Transport>>;
}

// ============================================================================
// WEBSOCKET TRANSPORT
// ============================================================================

enum Outgoing {
    Text(String),
    Close,
}

/// Opens [`WebSocketTransport`]s on the current tokio runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn open(&self, address: &str, events: EventSink) -> RealtimeResult<Arc<dyn Transport>> {
        let runtime = Handle::try_current().map_err(|e| RealtimeError::NoRuntime(e.to_string()))?;

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(WebSocketTransport {
            outgoing: outgoing_tx,
            open: Arc::new(AtomicBool::new(false)),
        });

        runtime.spawn(run_socket(
            address.to_string(),
            outgoing_rx,
            transport.open.clone(),
            events,
        ));
        Ok(transport)
    }
}

/// Handle to one socket task; writes go through an unbounded channel
pub struct WebSocketTransport {
    outgoing: mpsc::UnboundedSender<Outgoing>,
    open: Arc<AtomicBool>,
}

impl Transport for WebSocketTransport {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_text(&self, text: String) -> RealtimeResult<()> {
        if !self.is_open() {
            return Err(RealtimeError::NotConnected);
        }
        self.outgoing
            .send(Outgoing::Text(text))
            .map_err(|_| RealtimeError::Transport("socket task has stopped".to_string()))
    }

    fn close(&self) {
        // The task may already be gone
        let _ = self.outgoing.send(Outgoing::Close);
    }
}

async fn run_socket(
    address: String,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    open: Arc<AtomicBool>,
    events: EventSink,
) {
    if is_debug_transport_enabled() {
        logger::debug(LogTag::Transport, &format!("Connecting to {}", address));
    }

    let connected = tokio::select! {
        result = connect_async(address.as_str()) => result,
        _ = wait_for_close(&mut outgoing) => {
            events(TransportEvent::Closed {
                code: None,
                reason: "closed before connecting".to_string(),
            });
            return;
        }
    };

    let stream = match connected {
        Ok((stream, _response)) => stream,
        Err(e) => {
            events(TransportEvent::Error(format!(
                "Failed to connect to {}: {}",
                address, e
            )));
            return;
        }
    };

    open.store(true, Ordering::SeqCst);
    events(TransportEvent::Opened);

    let (mut ws_tx, mut ws_rx) = stream.split();

    let terminal = loop {
        tokio::select! {
            command = outgoing.recv() => match command {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = ws_tx.send(WsMessage::Text(text)).await {
                        break TransportEvent::Error(format!("Send error: {}", e));
                    }
                }
                Some(Outgoing::Close) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client closing".into(),
                    };
                    let _ = ws_tx.send(WsMessage::Close(Some(frame))).await;
                    let _ = ws_tx.close().await;
                    break TransportEvent::Closed {
                        code: Some(u16::from(CloseCode::Normal)),
                        reason: "closed by client".to_string(),
                    };
                }
            },

            frame = ws_rx.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if is_debug_transport_enabled() {
                        logger::debug(
                            LogTag::Transport,
                            &format!("Received {} bytes", text.len()),
                        );
                    }
                    events(TransportEvent::Message(text));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (Some(u16::from(f.code)), f.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    break TransportEvent::Closed { code, reason };
                }
                // Ping/pong are answered by tungstenite; binary frames are not part of the protocol
                Some(Ok(_)) => {}
                Some(Err(e)) => break TransportEvent::Error(format!("WebSocket error: {}", e)),
                None => {
                    break TransportEvent::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    }
                }
            },
        }
    };

    open.store(false, Ordering::SeqCst);
    events(terminal);
}

/// Resolve once a close is requested (or every handle is gone); text queued
/// before the socket is open is discarded since the queue only flushes when open
async fn wait_for_close(outgoing: &mut mpsc::UnboundedReceiver<Outgoing>) {
    loop {
        match outgoing.recv().await {
            Some(Outgoing::Close) | None => return,
            Some(Outgoing::Text(_)) => {}
        }
    }
}

// ============================================================================
// TEST DOUBLE
// ============================================================================
