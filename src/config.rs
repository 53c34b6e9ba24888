//! Application configuration.
//!
//! Loaded from a YAML file at startup and validated before any background
//! task runs. Validation failures here are the only fatal errors in the
//! system; once the process is running, nothing in the core terminates it.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persist::DEFAULT_CHECKPOINT_INTERVAL;
use crate::runner::RunnerConfig;
use crate::view::DEFAULT_VIEW_LIMIT;

/// Default snapshot file path.
pub const DEFAULT_SNAPSHOT_PATH: &str = "measurements.json";

fn default_snapshot_path() -> String {
    DEFAULT_SNAPSHOT_PATH.to_string()
}

fn default_checkpoint_interval() -> Duration {
    DEFAULT_CHECKPOINT_INTERVAL
}

fn default_view_limit() -> usize {
    DEFAULT_VIEW_LIMIT
}

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    Validation(String),
}

/// Web server configuration for the read API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "127.0.0.1").
    pub bind: String,

    /// Server port (default: 7000).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 7000,
        }
    }
}

/// Snapshot persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Snapshot file path (default: "measurements.json").
    #[serde(default = "default_snapshot_path")]
    pub path: String,

    /// Interval between periodic checkpoints (default: 5m).
    #[serde(default = "default_checkpoint_interval", with = "humantime_serde")]
    pub checkpoint_interval: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_SNAPSHOT_PATH.to_string(),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Read API server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Measurement runner configuration.
    pub measure: RunnerConfig,

    /// Snapshot persistence configuration.
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Number of groups the presentation view exposes (default: 24).
    #[serde(default = "default_view_limit")]
    pub view_limit: usize,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::Validation(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;

        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server port must be non-zero".to_string(),
            ));
        }

        if self.measure.server_ids.is_empty() {
            return Err(ConfigError::Validation(
                "measure.server_ids must list at least one server".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for id in &self.measure.server_ids {
            if id.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "measure.server_ids must not contain empty ids".to_string(),
                ));
            }
            if !seen.insert(id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "measure.server_ids contains duplicate id '{id}'"
                )));
            }
        }

        if self.measure.command.trim().is_empty() {
            return Err(ConfigError::Validation(
                "measure.command must not be empty".to_string(),
            ));
        }

        if self.measure.probe_timeout >= self.measure.interval {
            return Err(ConfigError::Validation(format!(
                "measure.probe_timeout ({:?}) must be shorter than measure.interval ({:?})",
                self.measure.probe_timeout, self.measure.interval
            )));
        }

        if self.snapshot.checkpoint_interval.is_zero() {
            return Err(ConfigError::Validation(
                "snapshot.checkpoint_interval must be positive".to_string(),
            ));
        }

        if Path::new(&self.snapshot.path).file_name().is_none() {
            return Err(ConfigError::Validation(format!(
                "snapshot.path '{}' has no file name",
                self.snapshot.path
            )));
        }

        if self.view_limit == 0 {
            return Err(ConfigError::Validation(
                "view_limit must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig::default(),
            measure: RunnerConfig {
                server_ids: vec!["16683".into(), "3501".into(), "11207".into()],
                ..RunnerConfig::default()
            },
            snapshot: SnapshotConfig::default(),
            view_limit: DEFAULT_VIEW_LIMIT,
        }
    }

    #[test]
    fn test_minimal_yaml_applies_defaults() {
        let yaml = "measure:\n  server_ids: [\"16683\"]\n";
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.measure.interval, Duration::from_secs(3600));
        assert_eq!(config.measure.probe_timeout, Duration::from_secs(120));
        assert_eq!(config.measure.command, "speedtest-cli");
        assert_eq!(config.snapshot.path, DEFAULT_SNAPSHOT_PATH);
        assert_eq!(
            config.snapshot.checkpoint_interval,
            Duration::from_secs(300)
        );
        assert_eq!(config.view_limit, 24);
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
server:
  bind: "0.0.0.0"
  port: 8080
measure:
  server_ids: ["16683", "3501"]
  interval: 30m
  probe_timeout: 90s
  command: speedtest
snapshot:
  path: /var/lib/speedwatch/history.json
  checkpoint_interval: 2m
view_limit: 48
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.measure.interval, Duration::from_secs(1800));
        assert_eq!(config.measure.probe_timeout, Duration::from_secs(90));
        assert_eq!(config.measure.command, "speedtest");
        assert_eq!(
            config.snapshot.checkpoint_interval,
            Duration::from_secs(120)
        );
        assert_eq!(config.view_limit, 48);
    }

    #[test]
    fn test_validate_rejects_empty_targets() {
        let mut config = valid_config();
        config.measure.server_ids.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server_ids"));
    }

    #[test]
    fn test_validate_rejects_duplicate_targets() {
        let mut config = valid_config();
        config.measure.server_ids = vec!["1".into(), "1".into()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_validate_rejects_blank_target() {
        let mut config = valid_config();
        config.measure.server_ids = vec!["  ".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_timeout_not_shorter_than_interval() {
        let mut config = valid_config();
        config.measure.interval = Duration::from_secs(60);
        config.measure.probe_timeout = Duration::from_secs(60);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("probe_timeout"));
    }

    #[test]
    fn test_validate_rejects_bad_bind_and_port() {
        let mut config = valid_config();
        config.server.bind = "not-an-ip".into();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_view_limit() {
        let mut config = valid_config();
        config.view_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let result = AppConfig::load("/nonexistent/config.yaml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
