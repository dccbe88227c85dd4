//! Scanning client configuration with YAML support

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::ReconnectPolicy;

/// Scanning client configuration
///
/// Can be loaded from YAML or JSON, or constructed with [`ScanConfig::builder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Connection settings
    pub connection: ConnectionConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Retry/heartbeat policy (disabled by default)
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// WebSocket URL of the scanning endpoint (e.g. `ws://host:8090/ws/scan`)
    pub url: String,
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Handshake timeout in milliseconds (default: 10s)
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,

    /// How long `start_scanning` waits for the connection to be confirmed (default: 5s)
    #[serde(default = "default_connected_wait")]
    pub connected_wait_ms: u64,

    /// How long `end_session` waits for `session_ended` before disconnecting (default: 1s)
    #[serde(default = "default_end_session_grace")]
    pub end_session_grace_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_timeout(),
            connected_wait_ms: default_connected_wait(),
            end_session_grace_ms: default_end_session_grace(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_connected_wait() -> u64 {
    5_000
}

fn default_end_session_grace() -> u64 {
    1_000
}

impl TimeoutsConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn connected_wait(&self) -> Duration {
        Duration::from_millis(self.connected_wait_ms)
    }

    pub fn end_session_grace(&self) -> Duration {
        Duration::from_millis(self.end_session_grace_ms)
    }
}

impl ScanConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Serialize configuration to YAML
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Create a builder for programmatic configuration
    pub fn builder(url: impl Into<String>) -> ScanConfigBuilder {
        ScanConfigBuilder::new(url)
    }
}

/// Builder for ScanConfig
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    /// Create a new builder with the given endpoint URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            config: ScanConfig {
                connection: ConnectionConfig { url: url.into() },
                timeouts: TimeoutsConfig::default(),
                reconnect: ReconnectPolicy::disabled(),
            },
        }
    }

    /// Set handshake timeout in milliseconds
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeouts.connect_ms = ms;
        self
    }

    /// Set the wait for connection confirmation in milliseconds
    pub fn connected_wait_ms(mut self, ms: u64) -> Self {
        self.config.timeouts.connected_wait_ms = ms;
        self
    }

    /// Set the end-of-session acknowledgement grace period in milliseconds
    pub fn end_session_grace_ms(mut self, ms: u64) -> Self {
        self.config.timeouts.end_session_grace_ms = ms;
        self
    }

    /// Set the reconnect policy
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ScanConfig {
        self.config
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
