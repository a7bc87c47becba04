//! Server configuration.
//!
//! Configuration is layered, lowest priority first:
//! - Built-in defaults
//! - TOML configuration file (`PARLOR_CONFIG`, or the first of the default paths)
//! - Environment variables (`PARLOR_*`, `__` between nested keys)

use anyhow::{Context, Result};
use parlor_core::{MembershipPolicy, SessionConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PARLOR";

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "PARLOR_CONFIG";

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "parlor.toml",
    "/etc/parlor/parlor.toml",
    "~/.config/parlor/parlor.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Message persistence.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Session behaviour.
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory, lost on restart.
    Memory,
    /// SQLite database file.
    #[default]
    Sqlite,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Which backend to use.
    #[serde(default)]
    pub backend: StorageBackend,

    /// Database file for the SQLite backend. `~` is expanded.
    #[serde(default = "default_storage_path")]
    pub path: String,

    /// SQLite pool size.
    #[serde(default = "default_max_db_connections")]
    pub max_connections: u32,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Pending deliveries per connection before new ones are dropped.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

/// Session configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// How strictly room membership is enforced.
    #[serde(default)]
    pub membership_policy: MembershipPolicy,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_storage_path() -> String {
    "parlor.db".to_string()
}

fn default_max_db_connections() -> u32 {
    5
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_outbox_capacity() -> usize {
    parlor_core::session::DEFAULT_OUTBOX_CAPACITY
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            storage: StorageConfig::default(),
            limits: LimitsConfig::default(),
            sessions: SessionsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
            max_connections: default_max_db_connections(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl StorageConfig {
    /// Database path with `~` and environment variables expanded.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced environment variable is unset.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.path)
            .with_context(|| format!("Failed to expand storage path: {}", self.path))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let file = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Some(PathBuf::from(shellexpand::tilde(&path).as_ref())),
            Err(_) => find_default_file(),
        };
        Self::from_sources(file.as_deref(), environment())
    }

    /// Load configuration from an optional file, overridden by `env`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value has the wrong
    /// type.
    pub fn from_sources(file: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(env)
            .build()
            .context("Failed to load configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if let Some(path) = file {
            tracing::debug!(path = %path.display(), "Loaded config file");
        }
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse configuration")
    }

    /// Session manager settings derived from this configuration.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            outbox_capacity: self.limits.outbox_capacity,
            policy: self.sessions.membership_policy,
        }
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

/// The `PARLOR_*` environment source.
#[must_use]
pub fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn find_default_file() -> Option<PathBuf> {
    DEFAULT_CONFIG_PATHS
        .iter()
        .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
        .find(|path| path.exists())
}
