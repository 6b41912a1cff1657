//! Real-time notification transport
//!
//! - `keys`: subscription descriptors and listener keys
//! - `queue`: outbound validation and buffering
//! - `registry`: lifecycle listeners by subscription and by reference
//! - `router`: event fan-out to generic and lifecycle listeners
//! - `connection`: socket lifecycle and reconnect policy for one community
//! - `instances`: per-community singleton registry with initializer hooks
//! - `transport`: socket seam and the WebSocket implementation

pub mod connection;
pub mod instances;
pub mod keys;
pub mod listener;
pub mod queue;
pub mod registry;
pub mod router;
pub mod transport;
pub mod types;

pub use connection::{ConnectionManager, ConnectionState};
pub use instances::{Initializer, InstanceRegistry};
pub use keys::Subscription;
pub use listener::{Listener, RealTimeListener};
pub use queue::{FlushOutcome, SendQueue};
pub use registry::SubscriptionRegistry;
pub use router::BroadcastRouter;
pub use transport::{Connector, Transport, TransportEvent, WebSocketConnector};
pub use types::{EventType, Message, MessageType, RawEvent, RealTimeComponent, RealTimePayload};
