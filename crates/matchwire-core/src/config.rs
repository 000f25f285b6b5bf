// Configuration loading: built-in defaults, optional telemetry.toml, and the
// MATCHWIRE_SERVER_URL environment override.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::endpoint;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Local development endpoint used when nothing else is configured.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8080";

/// Environment variable that overrides the configured server URL.
pub const SERVER_URL_ENV: &str = "MATCHWIRE_SERVER_URL";

pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Fixed interval between active-match discovery polls.
pub const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Fixed budget for every REST call.
pub const REST_TIMEOUT: Duration = Duration::from_secs(5);

/// Config file looked up relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/telemetry.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Assembled config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Normalized WebSocket base (`ws://` or `wss://`, no trailing slash).
    pub server_url: String,
    pub auto_reconnect: bool,
    pub reconnect_interval: Duration,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            server_url: DEFAULT_SERVER_URL.to_string(),
            auto_reconnect: true,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            poll_interval: DISCOVERY_POLL_INTERVAL,
            request_timeout: REST_TIMEOUT,
        }
    }
}

impl TelemetryConfig {
    /// REST base derived from the socket base.
    pub fn http_url(&self) -> String {
        endpoint::http_base(&self.server_url)
    }

    /// Replace the server URL, normalizing it the same way file values are.
    pub fn with_server_url(mut self, url: &str) -> Self {
        self.server_url = endpoint::normalize_ws_base(url);
        self
    }
}

// ---------------------------------------------------------------------------
// telemetry.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    telemetry: TelemetrySection,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct TelemetrySection {
    server_url: Option<String>,
    auto_reconnect: Option<bool>,
    reconnect_interval_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load configuration from an explicit file path. The file must exist.
///
/// Does not consult the environment; see [`load_config`] for the full
/// precedence chain.
pub fn load_config_from(path: &Path) -> Result<TelemetryConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })?;
    let file: ConfigFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;
    apply_file(TelemetryConfig::default(), file.telemetry)
}

/// Load configuration with the full precedence chain: defaults, then the
/// config file (`explicit` if given, otherwise `config/telemetry.toml` when
/// present), then the `MATCHWIRE_SERVER_URL` environment variable.
pub fn load_config(explicit: Option<&Path>) -> Result<TelemetryConfig, ConfigError> {
    let config = match explicit {
        Some(path) => load_config_from(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                load_config_from(default_path)?
            } else {
                TelemetryConfig::default()
            }
        }
    };
    apply_env(config, |key| std::env::var(key).ok())
}

/// Apply environment overrides through `lookup` so tests don't touch the
/// process environment.
pub fn apply_env<F>(mut config: TelemetryConfig, lookup: F) -> Result<TelemetryConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(SERVER_URL_ENV) {
        config.server_url = url;
    }
    finish(config)
}

fn apply_file(
    mut config: TelemetryConfig,
    section: TelemetrySection,
) -> Result<TelemetryConfig, ConfigError> {
    if let Some(url) = section.server_url {
        config.server_url = url;
    }
    if let Some(auto) = section.auto_reconnect {
        config.auto_reconnect = auto;
    }
    if let Some(secs) = section.reconnect_interval_secs {
        if secs == 0 {
            return Err(ConfigError::ValidationError {
                field: "telemetry.reconnect_interval_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        config.reconnect_interval = Duration::from_secs(secs);
    }
    finish(config)
}

fn finish(mut config: TelemetryConfig) -> Result<TelemetryConfig, ConfigError> {
    if config.server_url.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "telemetry.server_url".into(),
            message: "must not be empty".into(),
        });
    }
    config.server_url = endpoint::normalize_ws_base(&config.server_url);
    Ok(config)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
