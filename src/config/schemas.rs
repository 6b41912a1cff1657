//! Configuration schemas - all config structures defined once with defaults
use crate::config_struct;
use serde::{Deserialize, Serialize};

// ============================================================================
// REALTIME CONFIGURATION
// ============================================================================

config_struct! {
    /// Connection tuning for the realtime socket
    pub struct RealtimeConfig {
        /// First reconnect delay; doubled after every failed attempt
        reconnect_base_delay_ms: u64 = 1000,

        /// Recheck interval while the outbound queue waits for an open socket
        flush_poll_interval_ms: u64 = 1000,

        /// Appended to `<server><contextPath>/<permalink>`
        path_suffix: String = "/realtime".to_string(),
    }
}

// ============================================================================
// ROOT CONFIGURATION
// ============================================================================

config_struct! {
    /// API server location plus realtime tuning
    pub struct Config {
        /// Scheme and host, e.g. "https://api.stackend.com"
        server: String = "https://api.stackend.com".to_string(),

        /// Path prefix of the API below the server, may be empty
        context_path: String = String::new(),

        realtime: RealtimeConfig = RealtimeConfig::default(),
    }
}

// ============================================================================
// COMMUNITY DESCRIPTOR
// ============================================================================

/// The community a connection belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Community {
    pub id: i64,
    /// Stable internal name, used as the registry key and community context prefix
    pub xcap_community_name: String,
    pub permalink: String,
}

impl Community {
    pub fn new(id: i64, xcap_community_name: &str, permalink: &str) -> Self {
        Self {
            id,
            xcap_community_name: xcap_community_name.to_string(),
            permalink: permalink.to_string(),
        }
    }
}
