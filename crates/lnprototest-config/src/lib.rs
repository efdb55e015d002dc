#![deny(unsafe_code)]

//! Configuration loading and validation for the lnprototest proxy daemon.
//!
//! Loads TOML configuration files and validates them. Provides the
//! [`AppConfig`] type as the central configuration structure and the
//! [`Network`] selector handed to the connection proxy.

mod network;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use network::{Network, UnknownNetwork};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Daemon configuration.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Outbound peer connection settings.
    #[serde(default)]
    pub peer: PeerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Configuration for the daemon process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory holding the control socket. Defaults to the user's home
    /// directory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Address the downstream peer is expected to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Port the downstream peer is expected to listen on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            listen_addr: default_listen_addr(),
            listen_port: default_listen_port(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    9090
}

/// Settings applied to every outbound peer connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Network selector passed to the connection proxy.
    #[serde(default)]
    pub network: Network,

    /// Upper bound on TCP connect plus the BOLT 8 handshake, in milliseconds.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Upper bound on waiting for each frame from the peer, in milliseconds.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            network: Network::default(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl PeerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn default_handshake_timeout_ms() -> u64 {
    3_000
}

fn default_read_timeout_ms() -> u64 {
    3_000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.listen_port == 0 {
            return Err(ConfigError::Validation(
                "daemon.listen_port must be non-zero".to_string(),
            ));
        }
        if self.daemon.listen_addr.is_empty() {
            return Err(ConfigError::Validation(
                "daemon.listen_addr must not be empty".to_string(),
            ));
        }
        if let Some(dir) = &self.daemon.data_dir {
            if dir.is_empty() {
                return Err(ConfigError::Validation(
                    "daemon.data_dir must not be empty when set".to_string(),
                ));
            }
        }
        if self.peer.handshake_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "peer.handshake_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.peer.read_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "peer.read_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.logging.level.is_empty() {
            return Err(ConfigError::Validation(
                "logging.level must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the data directory, falling back to the home directory.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.daemon.data_dir {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => {
                let home = dirs::home_dir().ok_or_else(|| {
                    ConfigError::Validation(
                        "daemon.data_dir is unset and no home directory could be found"
                            .to_string(),
                    )
                })?;
                tracing::debug!(path = %home.display(), "data_dir unset, using home directory");
                Ok(home)
            }
        }
    }
}
