//! Coordinator Configuration
//!
//! Tunables for dialing, hosting and the race-loss retry.
//!
//! # Configuration Priority
//!
//! 1. CLI arguments (applied by the caller)
//! 2. Environment variables (`STANCE_*`)
//! 3. TOML file at `$XDG_CONFIG_HOME/stance/stance.toml`
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! bind_address = "127.0.0.1"
//! connect_timeout_ms = 5000
//! handshake_timeout_ms = 5000
//! retry_delay_ms = 1000
//! max_connections = 128
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Configuration shared by the coordinator, host and proxy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StanceConfig {
    /// Interface the host binds and peers dial
    pub bind_address: IpAddr,

    /// How long a dial may take before it is abandoned
    pub connect_timeout_ms: u64,

    /// How long the authentication handshake may take, on either side
    pub handshake_timeout_ms: u64,

    /// Pause before the single retry after losing the race to bind
    pub retry_delay_ms: u64,

    /// Concurrent peer connections a host accepts
    pub max_connections: usize,

    /// Buffered outbound frames per proxy
    pub channel_capacity: usize,
}

impl Default for StanceConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            connect_timeout_ms: 5000,
            handshake_timeout_ms: 5000,
            retry_delay_ms: 1000,
            max_connections: 128,
            channel_capacity: 64,
        }
    }
}

impl StanceConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `STANCE_BIND_ADDRESS`: interface to bind/dial
    /// - `STANCE_CONNECT_TIMEOUT`: dial timeout in ms
    /// - `STANCE_HANDSHAKE_TIMEOUT`: handshake timeout in ms
    /// - `STANCE_RETRY_DELAY`: race-loss retry delay in ms
    /// - `STANCE_MAX_CONNECTIONS`: concurrent peers per host
    /// - `STANCE_CHANNEL_CAPACITY`: outbound frame buffer per proxy
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the overrides produce an
    /// unusable configuration.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default().with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `STANCE_*` environment variables on top of `self`
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        fn var<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.parse().ok())
        }

        Self {
            bind_address: var("STANCE_BIND_ADDRESS").unwrap_or(self.bind_address),
            connect_timeout_ms: var("STANCE_CONNECT_TIMEOUT").unwrap_or(self.connect_timeout_ms),
            handshake_timeout_ms: var("STANCE_HANDSHAKE_TIMEOUT")
                .unwrap_or(self.handshake_timeout_ms),
            retry_delay_ms: var("STANCE_RETRY_DELAY").unwrap_or(self.retry_delay_ms),
            max_connections: var("STANCE_MAX_CONNECTIONS").unwrap_or(self.max_connections),
            channel_capacity: var("STANCE_CHANNEL_CAPACITY").unwrap_or(self.channel_capacity),
        }
    }

    /// Reject values that would make the coordinator unusable
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 || self.handshake_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Socket address for `port` on the configured interface
    #[must_use]
    pub fn socket_addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.bind_address, port)
    }

    /// Dial timeout as Duration
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Handshake timeout as Duration
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Race-loss retry delay as Duration
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/stance/stance.toml` (typically `~/.config/stance/stance.toml`)
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("stance").join("stance.toml"))
}

/// Load configuration from the default file, then environment variables
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<StanceConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then environment variables
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the resulting values are invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<StanceConfig, ConfigError> {
    let mut config = StanceConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;
            config = toml::from_str(&toml_content)?;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}
