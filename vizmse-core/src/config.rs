//! Session configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via VIZMSE_CONFIG)
//! 3. Environment variables

use peptalk_client::ConnectionConfig;
use peptalk_protocol::{DEFAULT_PORT, DEFAULT_REST_PORT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration of one MSE session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// MSE host name or address.
    pub host: String,
    /// HTTP command port.
    pub rest_port: u16,
    /// PepTalk port.
    pub peptalk_port: u16,
    /// Alternative host for HTTP commands. May carry its own scheme.
    pub rest_host: Option<String>,
    /// Per-request timeout in milliseconds, for both PepTalk and HTTP.
    pub request_timeout_ms: u64,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Delay between reconnect attempts in milliseconds.
    pub reconnect_delay_ms: u64,
    /// Negotiate `protocol peptalk noevents`.
    pub noevents: bool,
    /// Creator tag written on new internal elements.
    pub creator: String,
    /// Build a rundown's channel map in the background as soon as it is created.
    pub build_channel_map_on_create: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            rest_port: DEFAULT_REST_PORT,
            peptalk_port: DEFAULT_PORT,
            rest_host: None,
            request_timeout_ms: 3000,
            connect_timeout_ms: 10_000,
            reconnect_delay_ms: 5000,
            noevents: false,
            creator: "vizmse".to_string(),
            build_channel_map_on_create: true,
        }
    }
}

impl SessionConfig {
    /// Default configuration for `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("VIZMSE_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: SessionConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("VIZMSE_HOST") {
            if !host.is_empty() {
                self.host = host;
            }
        }

        if let Ok(port) = std::env::var("VIZMSE_REST_PORT") {
            if let Ok(port) = port.parse() {
                self.rest_port = port;
            }
        }

        if let Ok(port) = std::env::var("VIZMSE_PEPTALK_PORT") {
            if let Ok(port) = port.parse() {
                self.peptalk_port = port;
            }
        }

        if let Ok(host) = std::env::var("VIZMSE_REST_HOST") {
            self.rest_host = if host.is_empty() { None } else { Some(host) };
        }

        if let Ok(timeout) = std::env::var("VIZMSE_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.request_timeout_ms = ms;
            }
        }

        if let Ok(delay) = std::env::var("VIZMSE_RECONNECT_MS") {
            if let Ok(ms) = delay.parse() {
                self.reconnect_delay_ms = ms;
            }
        }

        if let Ok(creator) = std::env::var("VIZMSE_CREATOR") {
            self.creator = creator;
        }
    }

    /// Checks the configuration for values that cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::ValidationError("host must not be empty".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "request_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Base URL of the HTTP command interface, without trailing slash.
    pub fn rest_base_url(&self) -> String {
        match &self.rest_host {
            Some(host) if host.starts_with("http://") || host.starts_with("https://") => {
                format!("{}:{}", host.trim_end_matches('/'), self.rest_port)
            }
            Some(host) => format!("http://{}:{}", host, self.rest_port),
            None => format!("http://{}:{}", self.host, self.rest_port),
        }
    }

    /// PepTalk connection settings derived from this configuration.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new(self.host.clone())
            .with_port(self.peptalk_port)
            .with_connect_timeout(self.connect_timeout())
            .with_request_timeout(self.request_timeout())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    IoError(PathBuf, std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    ParseError(PathBuf, String),

    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}
