pub mod arguments;
pub mod config;
pub mod errors; // Structured error handling
pub mod logger;
pub mod realtime;

pub use errors::{RealtimeError, RealtimeResult};
