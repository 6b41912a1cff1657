//! Command line switches read at runtime
//!
//! The logger and the realtime modules ask here whether `--debug-<tag>`,
//! `--verbose` or `--quiet` was given. Arguments are captured from
//! `env::args()` on first use; `set_cmd_args` replaces them.
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::env;

use crate::logger::LogTag;

static CMD_ARGS: Lazy<RwLock<Vec<String>>> = Lazy::new(|| RwLock::new(env::args().collect()));

pub fn set_cmd_args(args: Vec<String>) {
    *CMD_ARGS.write() = args;
}

pub fn get_cmd_args() -> Vec<String> {
    CMD_ARGS.read().clone()
}

pub fn has_arg(flag: &str) -> bool {
    CMD_ARGS.read().iter().any(|arg| arg == flag)
}

fn debug_flag(tag: LogTag) -> bool {
    has_arg(&format!("--debug-{}", tag.to_debug_key()))
}

// =============================================================================
// DEBUG FLAGS
// =============================================================================

/// Connection lifecycle
pub fn is_debug_realtime_enabled() -> bool {
    debug_flag(LogTag::Realtime)
}

pub fn is_debug_transport_enabled() -> bool {
    debug_flag(LogTag::Transport)
}

pub fn is_debug_queue_enabled() -> bool {
    debug_flag(LogTag::Queue)
}

pub fn is_debug_router_enabled() -> bool {
    debug_flag(LogTag::Router)
}

/// Instance and subscription registries
pub fn is_debug_registry_enabled() -> bool {
    debug_flag(LogTag::Registry)
}

pub fn is_verbose_enabled() -> bool {
    has_arg("--verbose")
}

/// Only warnings and errors
pub fn is_quiet_enabled() -> bool {
    has_arg("--quiet")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_flags_follow_cmd_args() {
        let saved = get_cmd_args();
        set_cmd_args(vec![
            "stackend-realtime".to_string(),
            "--debug-queue".to_string(),
            "--community".to_string(),
            "acme".to_string(),
        ]);

        assert!(has_arg("--community"));
        assert!(is_debug_queue_enabled());
        assert!(!is_debug_router_enabled());
        assert!(!is_verbose_enabled());

        set_cmd_args(saved);
    }
}
