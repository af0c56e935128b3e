//! ==============================================================================
//! config.rs - Panel Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `panel.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - EndpointsConfig: Where the hub lives and which paths to call.
//!     - CacheConfig: Offline bucket version, asset manifest, storage dir, proxy address.
//!     - PollingConfig: Optional periodic refresh.
//!     - LoggingConfig: Filter level and reading echo.
//!
//! the loaded value is handed to the poller and the cache explicitly;
//! nothing reads configuration from a global.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PanelConfig {
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EndpointsConfig {
    pub base_url: String,
    pub state: String,       // GET, returns { ok, state }
    pub toggle_door: String, // POST, body ignored
    /// sent verbatim as a `Cookie` header (the hub api is login-protected)
    pub session_cookie: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub version: String,
    pub assets: Vec<String>,
    pub listen: String,
    /// one subdirectory per bucket lives here
    pub dir: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PollingConfig {
    /// 0 = manual refresh only
    pub interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_readings: bool,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            state: "/api/state".to_string(),
            toggle_door: "/api/toggle/door_sala".to_string(),
            session_cookie: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            version: "iot-cache-v1".to_string(),
            assets: vec![
                "/".to_string(),
                "/static/css/styles.css".to_string(),
                "/static/js/app.js".to_string(),
            ],
            listen: "127.0.0.1:3000".to_string(),
            dir: "cache".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_readings: true }
    }
}

impl EndpointsConfig {
    /// Resolve a configured path against `base_url`.
    /// Absolute urls are returned untouched.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    pub fn state_url(&self) -> String {
        self.url(&self.state)
    }

    pub fn toggle_door_url(&self) -> String {
        self.url(&self.toggle_door)
    }
}

impl PanelConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            std::path::PathBuf::from("config").join("panel.toml"),
            std::path::PathBuf::from("..").join("config").join("panel.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│          PANEL CONFIGURATION            │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Hub: {}", self.endpoints.base_url);
        println!("│ State: {}", self.endpoints.state);
        println!("│ Toggle: {}", self.endpoints.toggle_door);
        if self.cache.enabled {
            println!("│ Cache: {} ({} assets)", self.cache.version, self.cache.assets.len());
            println!("│ Cache Dir: {}", self.cache.dir);
            println!("│ Proxy: {}", self.cache.listen);
        } else {
            println!("│ Cache: disabled");
        }
        if self.polling.interval_seconds > 0 {
            println!("│ Poll Interval: {}s", self.polling.interval_seconds);
        } else {
            println!("│ Poll Interval: manual");
        }
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = PanelConfig::parse("").unwrap();
        assert_eq!(config.endpoints.state, "/api/state");
        assert_eq!(config.endpoints.toggle_door, "/api/toggle/door_sala");
        assert_eq!(config.cache.version, "iot-cache-v1");
        assert_eq!(config.cache.dir, "cache");
        assert_eq!(
            config.cache.assets,
            vec!["/", "/static/css/styles.css", "/static/js/app.js"]
        );
        assert_eq!(config.polling.interval_seconds, 0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = PanelConfig::parse(
            r#"
[endpoints]
base_url = "http://hub.local:8080/"
session_cookie = "session=abc"

[cache]
version = "iot-cache-v2"
dir = "/var/lib/iot-panel/cache"
"#,
        )
        .unwrap();

        assert_eq!(config.endpoints.base_url, "http://hub.local:8080/");
        assert_eq!(config.endpoints.state, "/api/state");
        assert_eq!(config.endpoints.session_cookie.as_deref(), Some("session=abc"));
        assert_eq!(config.cache.version, "iot-cache-v2");
        assert_eq!(config.cache.assets.len(), 3);
        assert_eq!(config.cache.dir, "/var/lib/iot-panel/cache");
        assert!(config.cache.enabled);
    }

    #[test]
    fn urls_resolve_against_base() {
        let endpoints = EndpointsConfig {
            base_url: "http://hub.local:8080/".to_string(),
            ..Default::default()
        };
        assert_eq!(endpoints.state_url(), "http://hub.local:8080/api/state");
        assert_eq!(endpoints.url("static/app.js"), "http://hub.local:8080/static/app.js");
        assert_eq!(endpoints.url("https://other/x"), "https://other/x");
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(PanelConfig::parse("[cache\nversion = 1").is_err());
    }
}
