//! Configuration management for the direct messenger.
//!
//! This module provides TOML-based configuration with support for multiple
//! configuration sources (default, file-based, environment variables) and
//! validation of configuration parameters.

use crate::utils::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "messenger.toml";

/// Environment variable prefix for configuration
pub const ENV_PREFIX: &str = "MESSENGER";

/// Complete configuration for the messenger client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessengerConfig {
    /// Backend endpoints
    pub server: ServerConfig,
    /// Directory lookup settings
    pub directory: DirectoryConfig,
    /// Session and event loop tuning
    pub session: SessionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Backend endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the REST API (directory lookups hang off this)
    pub api_base_url: String,
    /// WebSocket endpoint of the real-time transport
    pub socket_url: String,
}

/// Directory lookup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// Authorization scheme prefix; empty sends the raw token
    pub auth_scheme: String,
}

/// Session and event loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capacity of the per-session outbound frame queue
    pub outbound_queue_size: usize,
    /// Capacity of the client event queue
    pub event_queue_size: usize,
    /// Seconds allowed for a transport connection to be established
    pub connect_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_base_url: crate::defaults::DEFAULT_API_BASE_URL.to_string(),
            socket_url: crate::defaults::DEFAULT_SOCKET_URL.to_string(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: crate::defaults::DEFAULT_REQUEST_TIMEOUT,
            auth_scheme: String::new(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            outbound_queue_size: 64,
            event_queue_size: 256,
            connect_timeout_secs: crate::defaults::DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl MessengerConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, parsed or validated
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with multiple sources (default, file, environment)
    ///
    /// An explicit `config_file` that does not exist is an error; the
    /// default locations are only consulted when none is given.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default_locations()
                .into_iter()
                .find(|location| location.exists())
                .map(Self::from_file)
                .transpose()?
                .unwrap_or_default(),
        };

        config = config.merge_from_env()?;
        config.validate()?;

        Ok(config)
    }

    fn default_locations() -> [PathBuf; 2] {
        [
            PathBuf::from(DEFAULT_CONFIG_FILE),
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("direct-messenger")
                .join(DEFAULT_CONFIG_FILE),
        ]
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Merge configuration from environment variables
    fn merge_from_env(mut self) -> Result<Self> {
        if let Ok(url) = std::env::var(format!("{ENV_PREFIX}_SERVER_API_BASE_URL")) {
            self.server.api_base_url = url;
        }

        if let Ok(url) = std::env::var(format!("{ENV_PREFIX}_SERVER_SOCKET_URL")) {
            self.server.socket_url = url;
        }

        if let Ok(timeout) = std::env::var(format!("{ENV_PREFIX}_DIRECTORY_TIMEOUT_SECS")) {
            self.directory.request_timeout_secs =
                timeout.parse().map_err(|_| ConfigError::InvalidValue {
                    field: format!("{ENV_PREFIX}_DIRECTORY_TIMEOUT_SECS"),
                    value: timeout,
                })?;
        }

        if let Ok(timeout) = std::env::var(format!("{ENV_PREFIX}_SESSION_CONNECT_TIMEOUT_SECS")) {
            self.session.connect_timeout_secs =
                timeout.parse().map_err(|_| ConfigError::InvalidValue {
                    field: format!("{ENV_PREFIX}_SESSION_CONNECT_TIMEOUT_SECS"),
                    value: timeout,
                })?;
        }

        if let Ok(level) = std::env::var(format!("{ENV_PREFIX}_LOGGING_LEVEL")) {
            self.logging.level = level;
        }

        Ok(self)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        if self.server.api_base_url.trim().is_empty() {
            return Err(invalid("server.api_base_url", &self.server.api_base_url));
        }

        let socket_url = self.server.socket_url.as_str();
        if !(socket_url.starts_with("ws://") || socket_url.starts_with("wss://")) {
            return Err(invalid("server.socket_url", socket_url));
        }

        if self.directory.request_timeout_secs == 0 {
            return Err(invalid("directory.request_timeout_secs", "0"));
        }

        if self.session.outbound_queue_size == 0 {
            return Err(invalid("session.outbound_queue_size", "0"));
        }

        if self.session.event_queue_size == 0 {
            return Err(invalid("session.event_queue_size", "0"));
        }

        if self.session.connect_timeout_secs == 0 {
            return Err(invalid("session.connect_timeout_secs", "0"));
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            other => return Err(invalid("logging.level", other)),
        }

        Ok(())
    }

    /// Get the configuration as a pretty-printed TOML string
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            ConfigError::ParseError {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

fn invalid(field: &str, value: &str) -> crate::utils::MessengerError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}
