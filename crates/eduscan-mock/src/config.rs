//! Mock service configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file
//! at all) yields a usable development service.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a connection with an unknown token is turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectMode {
    /// Refuse the WebSocket upgrade with 401
    Handshake,
    /// Accept the upgrade, send `auth_error`, then close
    #[default]
    Message,
}

/// Complete mock service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockConfig {
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Accepted bearer tokens
    #[serde(default = "default_tokens")]
    pub tokens: Vec<String>,

    #[serde(default)]
    pub reject_mode: RejectMode,

    /// Fraction of correct answers a sheet needs to pass
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,

    /// Questions per answer sheet
    #[serde(default = "default_questions")]
    pub questions: usize,
}

fn default_port() -> u16 {
    8090
}

fn default_tokens() -> Vec<String> {
    vec!["dev-token".to_string()]
}

fn default_pass_threshold() -> f64 {
    0.5
}

fn default_questions() -> usize {
    10
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            tokens: default_tokens(),
            reject_mode: RejectMode::default(),
            pass_threshold: default_pass_threshold(),
            questions: default_questions(),
        }
    }
}

impl MockConfig {
    /// Parse from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn with_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reject_mode(mut self, mode: RejectMode) -> Self {
        self.reject_mode = mode;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.pass_threshold) {
            return Err(ConfigError::Invalid(format!(
                "pass_threshold must be between 0 and 1, got {}",
                self.pass_threshold
            )));
        }
        if self.questions == 0 {
            return Err(ConfigError::Invalid("questions must be at least 1".into()));
        }
        Ok(())
    }
}

/// Mock configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = MockConfig::from_toml("").unwrap();
        assert_eq!(config.port, 8090);
        assert_eq!(config.tokens, vec!["dev-token".to_string()]);
        assert_eq!(config.reject_mode, RejectMode::Message);
        assert_eq!(config.questions, 10);
    }

    #[test]
    fn test_full_config() {
        let config = MockConfig::from_toml(
            r#"
port = 9100
tokens = ["grader-a", "grader-b"]
reject_mode = "handshake"
pass_threshold = 0.7
questions = 20
"#,
        )
        .unwrap();

        assert_eq!(config.port, 9100);
        assert_eq!(config.tokens.len(), 2);
        assert_eq!(config.reject_mode, RejectMode::Handshake);
        assert_eq!(config.pass_threshold, 0.7);
        assert_eq!(config.questions, 20);
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let err = MockConfig::from_toml("pass_threshold = 1.5").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 18090").unwrap();
        assert_eq!(MockConfig::from_file(file.path()).unwrap().port, 18090);

        let missing = MockConfig::from_file("/nonexistent/mock.toml");
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
