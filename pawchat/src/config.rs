//! Client configuration.
//!
//! Layered like the broker's config, minus the CLI layer (the client core is
//! a library). Priority, highest first:
//! 1. Environment variables (`PAWCHAT_WS_URL`, `PAWCHAT_REST_URL`,
//!    `PAWCHAT_TOKEN`)
//! 2. TOML config file (`~/.config/pawchat/config.toml`)
//! 3. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur when loading client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

/// Top-level TOML config file structure (all fields optional for partial
/// overrides).
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ClientConfigFile {
    chat: ChatFileConfig,
}

/// `[chat]` section of the client config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    ws_url: Option<String>,
    rest_url: Option<String>,
    token: Option<String>,
    reconnect_delay_ms: Option<u64>,
    heartbeat_interval_ms: Option<u64>,
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The signed-in user whose inbox is subscribed.
    pub user_id: String,
    /// WebSocket endpoint of the broker.
    pub ws_url: String,
    /// Base URL of the REST API.
    pub rest_url: String,
    /// Bearer token for both transports, if any.
    pub token: Option<String>,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Session heartbeat period.
    pub heartbeat_interval: Duration,
}

impl ClientConfig {
    /// Config with compiled defaults for the given user.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ws_url: "ws://127.0.0.1:9100/ws".to_string(),
            rest_url: "http://127.0.0.1:9100".to_string(),
            token: None,
            reconnect_delay: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(15),
        }
    }

    /// Load configuration for a user by merging env vars and a TOML file
    /// over the defaults.
    ///
    /// A missing default-path config file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit config file cannot be read or
    /// any file fails to parse.
    pub fn load(
        user_id: impl Into<String>,
        config_path: Option<&std::path::Path>,
    ) -> Result<Self, ConfigError> {
        let file = load_config_file(config_path)?;
        Ok(Self::resolve(user_id, &file))
    }

    /// Priority: env > file > default.
    fn resolve(user_id: impl Into<String>, file: &ClientConfigFile) -> Self {
        let defaults = Self::new(user_id);

        Self {
            ws_url: std::env::var("PAWCHAT_WS_URL")
                .ok()
                .or_else(|| file.chat.ws_url.clone())
                .unwrap_or(defaults.ws_url),
            rest_url: std::env::var("PAWCHAT_REST_URL")
                .ok()
                .or_else(|| file.chat.rest_url.clone())
                .unwrap_or(defaults.rest_url),
            token: std::env::var("PAWCHAT_TOKEN")
                .ok()
                .or_else(|| file.chat.token.clone()),
            reconnect_delay: file
                .chat
                .reconnect_delay_ms
                .map_or(defaults.reconnect_delay, Duration::from_millis),
            heartbeat_interval: file
                .chat
                .heartbeat_interval_ms
                .map_or(defaults.heartbeat_interval, Duration::from_millis),
            user_id: defaults.user_id,
        }
    }
}

/// Load and parse a TOML config file for the client.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<ClientConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ClientConfigFile::default());
        };
        config_dir.join("pawchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
