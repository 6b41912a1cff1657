//! Configuration utilities - loading, saving and address construction
use super::schemas::{Community, Config};
use crate::errors::{RealtimeError, RealtimeResult};
use crate::logger::{self, LogTag};
use url::Url;

/// Default configuration file path
pub const CONFIG_FILE_PATH: &str = "data/realtime.toml";

/// Load configuration from a TOML file
///
/// A missing file is not an error: defaults from the schema definitions are used.
pub fn load_config_from_path(path: &str) -> RealtimeResult<Config> {
    if !std::path::Path::new(path).exists() {
        logger::warning(
            LogTag::Config,
            &format!("Config file '{}' not found, using default values", path),
        );
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| RealtimeError::Config(format!("Failed to read '{}': {}", path, e)))?;

    toml::from_str::<Config>(&contents)
        .map_err(|e| RealtimeError::Config(format!("Failed to parse '{}': {}", path, e)))
}

/// Write a configuration to disk as pretty TOML
pub fn save_config(config: &Config, path: &str) -> RealtimeResult<()> {
    let contents = toml::to_string_pretty(config)
        .map_err(|e| RealtimeError::Config(format!("Failed to serialize config: {}", e)))?;

    std::fs::write(path, contents)
        .map_err(|e| RealtimeError::Config(format!("Failed to write '{}': {}", path, e)))
}

impl Config {
    /// Socket address for a community:
    /// `server + contextPath + "/" + permalink + path_suffix`, with http(s) mapped to ws(s)
    pub fn realtime_address(&self, community: &Community) -> RealtimeResult<String> {
        let raw = format!(
            "{}{}/{}{}",
            self.server.trim_end_matches('/'),
            self.context_path,
            community.permalink,
            self.realtime.path_suffix
        );
        to_websocket_url(&raw)
    }
}

/// Map an http(s) address to ws(s); ws(s) passes through untouched
pub fn to_websocket_url(address: &str) -> RealtimeResult<String> {
    let invalid = |reason: String| RealtimeError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let mut url = Url::parse(address).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(url.to_string()),
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid(format!("cannot switch scheme to '{}'", scheme)))?;
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn community() -> Community {
        Community::new(7, "acme", "acme-forum")
    }

    #[test]
    fn test_realtime_address() {
        let mut config = Config::default();
        config.server = "https://api.example.com".to_string();
        config.context_path = "/api".to_string();

        assert_eq!(
            config.realtime_address(&community()).unwrap(),
            "wss://api.example.com/api/acme-forum/realtime"
        );

        config.server = "ws://localhost:8080/".to_string();
        config.context_path = String::new();
        assert_eq!(
            config.realtime_address(&community()).unwrap(),
            "ws://localhost:8080/acme-forum/realtime"
        );
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = to_websocket_url("ftp://example.com/x").unwrap_err();
        assert!(matches!(err, RealtimeError::InvalidAddress { .. }));
        assert!(to_websocket_url("not a url").is_err());
    }

    #[test]
    fn test_load_and_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("realtime.toml");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.realtime.reconnect_base_delay_ms = 250;
        save_config(&config, path).unwrap();

        let loaded = load_config_from_path(path).unwrap();
        assert_eq!(loaded.realtime.reconnect_base_delay_ms, 250);
        assert_eq!(loaded.server, config.server);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "server = \"http://localhost:9000\"\n").unwrap();

        let loaded = load_config_from_path(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.server, "http://localhost:9000");
        assert_eq!(loaded.realtime.flush_poll_interval_ms, 1000);
        assert_eq!(loaded.realtime.path_suffix, "/realtime");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let loaded = load_config_from_path("/definitely/not/here.toml").unwrap();
        assert_eq!(loaded, Config::default());
    }
}
