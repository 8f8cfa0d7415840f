//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use serde::Deserialize;

use crate::error::ConfigError;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// SSE channel settings.
    #[serde(default)]
    pub sse: SseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError {
                message: "server.port must be non-zero".to_string(),
            });
        }

        if self.sse.keepalive_secs == 0 {
            return Err(ConfigError::ValidationError {
                message: "sse.keepalive_secs must be non-zero".to_string(),
            });
        }

        if self.sse.cleanup_interval_secs == 0 {
            return Err(ConfigError::ValidationError {
                message: "sse.cleanup_interval_secs must be non-zero".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                ),
            });
        }

        Ok(())
    }
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    3000
}

/// SSE channel configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SseConfig {
    /// Seconds between keepalive pings per client.
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    /// Seconds of inactivity after which a client is evicted.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Seconds between idle-sweep runs.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: default_keepalive_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

const fn default_keepalive_secs() -> u64 {
    30
}

const fn default_idle_timeout_secs() -> u64 {
    30 * 60
}

const fn default_cleanup_interval_secs() -> u64 {
    60
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
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
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let json = r"{}";
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "_comment": "Test config",
            "server": {
                "host": "127.0.0.1",
                "port": 8080
            },
            "sse": {
                "keepalive_secs": 15,
                "idle_timeout_secs": 600,
                "cleanup_interval_secs": 30
            },
            "logging": {
                "level": "debug"
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.sse.keepalive_secs, 15);
        assert_eq!(config.sse.idle_timeout_secs, 600);
        assert_eq!(config.sse.cleanup_interval_secs, 30);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn sse_config_defaults() {
        let config = SseConfig::default();
        assert_eq!(config.keepalive_secs, 30);
        assert_eq!(config.idle_timeout_secs, 1800);
        assert_eq!(config.cleanup_interval_secs, 60);
    }

    #[test]
    fn logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "warn");
    }

    #[test]
    fn reject_zero_port() {
        let json = r#"{"server": {"port": 0}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_invalid_log_level() {
        let json = r#"{"logging": {"level": "verbose"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_unknown_fields() {
        let json = r#"{"unknown_field": "value"}"#;
        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
