//! Structured logging for stackend-realtime
//!
//! This module provides a small, ergonomic logging API with:
//! - Automatic debug mode filtering from command-line arguments
//! - Standard log levels (Error/Warning/Info/Debug/Verbose)
//! - Per-module debug control via --debug-<module> flags
//! - Colored console output
//!
//! ## Usage
//!
//! ```rust
//! use stackend_realtime::logger::{self, LogTag};
//!
//! logger::error(LogTag::Transport, "Socket error: connection reset");
//! logger::warning(LogTag::Realtime, "Reconnect scheduled in 4000ms");
//! logger::info(LogTag::System, "Connected to acme");
//! logger::debug(LogTag::Queue, "Flushed 3 messages"); // Only if --debug-queue
//! logger::verbose(LogTag::Router, "Dispatch to 2 listeners"); // Only if --verbose
//! ```
//!
//! ## Initialization
//!
//! Call once at startup:
//! ```rust
//! stackend_realtime::logger::init();
//! ```

mod config;
mod core;
mod format;
mod levels;
mod tags;

pub use config::{get_logger_config, init_from_args, set_logger_config, LoggerConfig};
pub use levels::LogLevel;
pub use tags::LogTag;

/// Initialize the logger system
///
/// Scans the command line for --debug-<module>, --verbose and --quiet
/// and installs the resulting filter.
pub fn init() {
    config::init_from_args();
}

/// Log at ERROR level (always shown, critical issues)
pub fn error(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level (important issues)
///
/// Warnings are shown by default and still shown under --quiet.
pub fn warning(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level (standard operations)
pub fn info(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level (detailed diagnostics)
///
/// Debug logs are ONLY shown when the --debug-<module> flag for the tag is provided.
///
/// # Example
/// ```rust
/// use stackend_realtime::logger::{self, LogTag};
///
/// // Only shown with --debug-transport flag
/// logger::debug(LogTag::Transport, "Frame received: 128 bytes");
/// ```
pub fn debug(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Debug, message);
}

/// Log at VERBOSE level (very detailed tracing, --verbose only)
pub fn verbose(tag: LogTag, message: &str) {
    core::log_internal(tag, LogLevel::Verbose, message);
}
