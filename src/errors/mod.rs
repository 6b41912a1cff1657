//! Error handling for stackend-realtime
//!
//! Two families live here: caller mistakes (malformed subscriptions, messages
//! and identifiers) that are returned straight to the offending call, and
//! runtime conditions (transport, config, runtime) that are logged and
//! surfaced as socket events rather than returned from `send`/`connect`.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("Invalid subscription: {0}")]
    InvalidSubscription(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Invalid community context: {0:?}")]
    InvalidCommunityContext(Option<String>),

    #[error("Invalid listener identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not connected")]
    NotConnected,

    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    #[error("Invalid connection address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RealtimeError {
    /// Errors caused by the caller's invocation; retrying the same call will fail again
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            RealtimeError::InvalidSubscription(_)
                | RealtimeError::InvalidMessage(_)
                | RealtimeError::InvalidCommunityContext(_)
                | RealtimeError::InvalidIdentifier(_)
        )
    }
}

pub type RealtimeResult<T> = Result<T, RealtimeError>;
