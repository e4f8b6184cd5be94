//! Configuration management
//!
//! Defaults, a TOML file format, and `LISTSYNC_*` environment overrides.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::core_event::RelayUrl;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub relays: RelayConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

/// Relay access configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Relays queried when the caller does not name any
    pub default_relays: Vec<RelayUrl>,

    /// How long a single relay may take to accept the subscription
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// After this, a relay that has not sent EOSE no longer holds back the
    /// drained state (its live events are still forwarded)
    #[serde(with = "humantime_serde")]
    pub eose_timeout: Duration,
}

/// Subscription plumbing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Capacity of the per-request relay -> dispatcher channel
    pub channel_capacity: usize,

    /// Events whose delivering relays are remembered (LRU)
    pub seen_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub json_format: bool,
    pub with_timestamp: bool,
    pub with_target: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_relays: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            eose_timeout: Duration::from_secs(15),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            seen_capacity: 10_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Variables follow the pattern `LISTSYNC_<SECTION>_<KEY>`, e.g.
    /// `LISTSYNC_RELAYS=wss://a.example,wss://b.example` or
    /// `LISTSYNC_RELAY_CONNECT_TIMEOUT_SECS=5`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Same as [`Config::from_env`] but reading from an arbitrary lookup
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(relays) = lookup("LISTSYNC_RELAYS") {
            config.relays.default_relays = relays
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    RelayUrl::parse(s).map_err(|e| {
                        ConfigError::InvalidValue(format!("Invalid relay url: {}", e))
                    })
                })
                .collect::<Result<_, _>>()?;
        }
        if let Some(secs) = lookup("LISTSYNC_RELAY_CONNECT_TIMEOUT_SECS") {
            config.relays.connect_timeout = parse_secs(&secs, "connect timeout")?;
        }
        if let Some(secs) = lookup("LISTSYNC_RELAY_EOSE_TIMEOUT_SECS") {
            config.relays.eose_timeout = parse_secs(&secs, "EOSE timeout")?;
        }

        if let Some(capacity) = lookup("LISTSYNC_SYNC_CHANNEL_CAPACITY") {
            config.sync.channel_capacity = capacity.parse().map_err(|e| {
                ConfigError::InvalidValue(format!("Invalid channel capacity: {}", e))
            })?;
        }
        if let Some(capacity) = lookup("LISTSYNC_SYNC_SEEN_CAPACITY") {
            config.sync.seen_capacity = capacity.parse().map_err(|e| {
                ConfigError::InvalidValue(format!("Invalid seen capacity: {}", e))
            })?;
        }

        if let Some(level) = lookup("LISTSYNC_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = lookup("LISTSYNC_LOG_JSON") {
            config.logging.json_format = json
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid JSON flag: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relays.connect_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "connect_timeout must be greater than 0".to_string(),
            ));
        }

        if self.relays.eose_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "eose_timeout must be greater than 0".to_string(),
            ));
        }

        if self.sync.channel_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "channel_capacity must be greater than 0".to_string(),
            ));
        }

        if self.sync.seen_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "seen_capacity must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}

fn parse_secs(value: &str, what: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| ConfigError::InvalidValue(format!("Invalid {}: {}", what, e)))
}
