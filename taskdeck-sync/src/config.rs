//! Configuration loading for the taskdeck sync engine.
//!
//! Connection fields are required. The `retry`, `events` and `logging`
//! sections fall back to their defaults when absent.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub auth: AuthConfig,
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub api_key: Option<String>,
    pub jwt: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EventsConfig {
    /// Broadcast buffer size. Subscribers that fall further behind lag.
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "taskdeck_sync=info,info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or TASKDECK_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl SyncConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(invalid("api_base_url", "must not be empty"));
        }
        let blank = |value: &Option<String>| value.as_deref().map_or(true, |v| v.trim().is_empty());
        if blank(&self.auth.api_key) && blank(&self.auth.jwt) {
            return Err(invalid("auth", "api_key or jwt must be provided"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms", "must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be >= 1"));
        }
        if self.retry.base_delay_ms == 0 {
            return Err(invalid("retry.base_delay_ms", "must be > 0"));
        }
        if self.events.capacity == 0 {
            return Err(invalid("events.capacity", "must be > 0"));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(invalid("logging.filter", "must not be empty"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("TASKDECK_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
api_base_url = "http://localhost:8080"
request_timeout_ms = 5000

[auth]
api_key = "dev-key"
"#;

    fn field_of(err: ConfigError) -> &'static str {
        match err {
            ConfigError::InvalidValue { field, .. } => field,
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn minimal_config_takes_defaults() {
        let config = SyncConfig::from_toml_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.events.capacity, 256);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn full_config_parses() {
        let toml = r#"
api_base_url = "https://tasks.example.com"
request_timeout_ms = 2500

[auth]
jwt = "token"

[retry]
max_attempts = 5
base_delay_ms = 200

[events]
capacity = 16

[logging]
filter = "taskdeck_sync=debug"
format = "json"
"#;
        let config = SyncConfig::from_toml_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.auth.jwt.as_deref(), Some("token"));
    }

    #[test]
    fn missing_required_field_is_parse_error() {
        let err = SyncConfig::from_toml_str("api_base_url = \"http://x\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let toml = format!("{MINIMAL}\n[retry]\nmax_attempts = 2\njitter_ms = 10\n");
        assert!(matches!(
            SyncConfig::from_toml_str(&toml).unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn zero_values_are_invalid() {
        let mut config = SyncConfig::from_toml_str(MINIMAL).unwrap();
        config.request_timeout_ms = 0;
        assert_eq!(field_of(config.validate().unwrap_err()), "request_timeout_ms");

        let mut config = SyncConfig::from_toml_str(MINIMAL).unwrap();
        config.retry.max_attempts = 0;
        assert_eq!(field_of(config.validate().unwrap_err()), "retry.max_attempts");

        let mut config = SyncConfig::from_toml_str(MINIMAL).unwrap();
        config.events.capacity = 0;
        assert_eq!(field_of(config.validate().unwrap_err()), "events.capacity");
    }

    #[test]
    fn blank_credentials_are_invalid() {
        let mut config = SyncConfig::from_toml_str(MINIMAL).unwrap();
        config.auth.api_key = Some("  ".to_string());
        assert_eq!(field_of(config.validate().unwrap_err()), "auth");
    }

    #[test]
    fn from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskdeck.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = SyncConfig::from_path(&path).unwrap();
        assert_eq!(config.api_base_url, "http://localhost:8080");

        let missing = SyncConfig::from_path(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io(_)));
    }
}
