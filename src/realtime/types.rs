//! Wire envelope, real-time payload and socket event types
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::errors::RealtimeResult;

/// Component and context used by PING and the subscription control messages
pub const REALTIME_COMPONENT: &str = "realtime";
pub const REALTIME_CONTEXT: &str = "realtime";

// ============================================================================
// MESSAGE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Ping,
    Pong,
    Subscribe,
    Unsubscribe,
    UnsubscribeAll,
    ObjectCreated,
    ObjectModified,
    ObjectRemoved,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
            MessageType::Subscribe => "SUBSCRIBE",
            MessageType::Unsubscribe => "UNSUBSCRIBE",
            MessageType::UnsubscribeAll => "UNSUBSCRIBE_ALL",
            MessageType::ObjectCreated => "OBJECT_CREATED",
            MessageType::ObjectModified => "OBJECT_MODIFIED",
            MessageType::ObjectRemoved => "OBJECT_REMOVED",
            MessageType::Error => "ERROR",
        }
    }

    /// Created/modified/removed: the payload is a [`RealTimePayload`]
    pub fn is_object_lifecycle(&self) -> bool {
        matches!(
            self,
            MessageType::ObjectCreated | MessageType::ObjectModified | MessageType::ObjectRemoved
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MESSAGE ENVELOPE
// ============================================================================

/// Envelope used in both directions.
///
/// Every field is optional on the wire; outbound messages are checked by
/// `queue::validate_message` before they are buffered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// `"<communityName>:<context>"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_context: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,

    /// Application defined. Travels as a JSON-encoded string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Message {
    pub fn new(
        community_context: impl Into<String>,
        component_name: impl Into<String>,
        message_type: MessageType,
    ) -> Self {
        Self {
            community_context: Some(community_context.into()),
            component_name: Some(component_name.into()),
            message_type: Some(message_type),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Serialize for transmission. A structured payload is encoded to a string first.
    pub fn to_wire(&self) -> RealtimeResult<String> {
        match &self.payload {
            Some(payload) if !payload.is_string() => {
                let mut wire = self.clone();
                wire.payload = Some(Value::String(serde_json::to_string(payload)?));
                Ok(serde_json::to_string(&wire)?)
            }
            _ => Ok(serde_json::to_string(self)?),
        }
    }

    pub fn from_wire(text: &str) -> RealtimeResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Decode the payload, accepting both the string-encoded wire form and a nested object
    pub fn decode_payload<T: DeserializeOwned>(&self) -> RealtimeResult<Option<T>> {
        match &self.payload {
            None => Ok(None),
            Some(Value::String(encoded)) => Ok(Some(serde_json::from_str(encoded)?)),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }
}

// ============================================================================
// REAL-TIME PAYLOAD
// ============================================================================

/// Functional area an object lifecycle event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealTimeComponent {
    Comment,
    Blog,
    Like,
}

impl RealTimeComponent {
    pub fn as_str(&self) -> &'static str {
        match self {
            RealTimeComponent::Comment => "comment",
            RealTimeComponent::Blog => "blog",
            RealTimeComponent::Like => "like",
        }
    }
}

impl fmt::Display for RealTimeComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload of OBJECT_CREATED / OBJECT_MODIFIED / OBJECT_REMOVED
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealTimePayload {
    pub community_context: String,
    pub component: RealTimeComponent,
    /// Domain object type name
    #[serde(rename = "type")]
    pub object_type: String,
    pub id: i64,
    pub obfuscated_reference: Option<String>,
    pub user_id: i64,
    pub reference_id: i64,
    pub reference_group_id: Option<i64>,
    pub likes: Option<i64>,
}

// ============================================================================
// SOCKET EVENTS
// ============================================================================

/// Event types broadcast to generic listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    SocketOpening,
    SocketOpened,
    SocketClosed,
    SocketError,
    ReceiveMessage,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SocketOpening => "SOCKET_OPENING",
            EventType::SocketOpened => "SOCKET_OPENED",
            EventType::SocketClosed => "SOCKET_CLOSED",
            EventType::SocketError => "SOCKET_ERROR",
            EventType::ReceiveMessage => "RECEIVE_MESSAGE",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transport-level detail attached to a broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    /// Text frame as received
    Text(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}
