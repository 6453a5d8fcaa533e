//! Configuration system for the pawchat broker.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/pawchat-broker/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

/// Errors that can occur when loading broker configuration.
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

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the broker.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BrokerConfigFile {
    server: ServerFileConfig,
}

/// `[server]` section of the broker config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    required_token: Option<String>,
    history_limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the broker server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Pawchat support-chat broker")]
pub struct BrokerCliArgs {
    /// Address to bind the broker to.
    #[arg(short, long, env = "PAWCHAT_BROKER_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/pawchat-broker/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Bearer token required on WebSocket upgrades (open access if unset).
    #[arg(long, env = "PAWCHAT_BROKER_TOKEN")]
    pub token: Option<String>,

    /// Maximum history rows returned per conversation.
    #[arg(long)]
    pub history_limit: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "PAWCHAT_BROKER_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:9100`).
    pub bind_addr: String,
    /// Bearer token required on socket upgrades, if any.
    pub required_token: Option<String>,
    /// Maximum history rows returned per conversation.
    pub history_limit: usize,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9100".to_string(),
            required_token: None,
            history_limit: 200,
            log_level: "info".to_string(),
        }
    }
}

impl BrokerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and a missing
    /// file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &BrokerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `BrokerConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &BrokerCliArgs, file: &BrokerConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            required_token: cli
                .token
                .clone()
                .or_else(|| file.server.required_token.clone()),
            history_limit: cli
                .history_limit
                .or(file.server.history_limit)
                .unwrap_or(defaults.history_limit),
            log_level: cli.log_level.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the broker.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<BrokerConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(BrokerConfigFile::default());
        };
        config_dir.join("pawchat-broker").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BrokerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
