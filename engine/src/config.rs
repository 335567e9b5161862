//! Engine configuration.

use crate::BackoffPolicy;
use std::env;
use std::time::Duration;

/// Tunables for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Retry budget for operations enqueued without one
    pub default_max_retries: u32,
    /// Priority for operations enqueued without one
    pub default_priority: i32,
    /// Backoff delay unit
    pub backoff_base: Duration,
    /// Optional cap on a single backoff delay
    pub backoff_max: Option<Duration>,
    /// Start a pass in the background when enqueueing while online
    pub sync_on_enqueue: bool,
    /// Start a pass when connectivity comes back
    pub sync_on_reconnect: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            default_priority: 1,
            backoff_base: Duration::from_secs(1),
            backoff_max: None,
            sync_on_enqueue: true,
            sync_on_reconnect: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `FAMSYNC_*` environment variables, falling
    /// back to the defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let default_max_retries = match lookup("FAMSYNC_MAX_RETRIES") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid("FAMSYNC_MAX_RETRIES", raw))?,
            None => defaults.default_max_retries,
        };

        let default_priority = match lookup("FAMSYNC_DEFAULT_PRIORITY") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid("FAMSYNC_DEFAULT_PRIORITY", raw))?,
            None => defaults.default_priority,
        };

        let backoff_base = match lookup("FAMSYNC_BACKOFF_BASE_MS") {
            Some(raw) => Duration::from_millis(
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid("FAMSYNC_BACKOFF_BASE_MS", raw))?,
            ),
            None => defaults.backoff_base,
        };

        let backoff_max = match lookup("FAMSYNC_BACKOFF_MAX_MS") {
            Some(raw) => Some(Duration::from_millis(
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid("FAMSYNC_BACKOFF_MAX_MS", raw))?,
            )),
            None => defaults.backoff_max,
        };

        let sync_on_enqueue = match lookup("FAMSYNC_SYNC_ON_ENQUEUE") {
            Some(raw) => parse_bool("FAMSYNC_SYNC_ON_ENQUEUE", raw)?,
            None => defaults.sync_on_enqueue,
        };

        let sync_on_reconnect = match lookup("FAMSYNC_SYNC_ON_RECONNECT") {
            Some(raw) => parse_bool("FAMSYNC_SYNC_ON_RECONNECT", raw)?,
            None => defaults.sync_on_reconnect,
        };

        Ok(Self {
            default_max_retries,
            default_priority,
            backoff_base,
            backoff_max,
            sync_on_enqueue,
            sync_on_reconnect,
        })
    }

    /// The backoff policy described by this configuration.
    pub fn backoff(&self) -> BackoffPolicy {
        let policy = BackoffPolicy::new(self.backoff_base);
        match self.backoff_max {
            Some(max) => policy.with_max(max),
            None => policy,
        }
    }
}

fn parse_bool(key: &'static str, raw: String) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid(key, raw)),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::InvalidConfig(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.default_priority, 1);
        assert_eq!(config.backoff(), BackoffPolicy::default());
    }

    #[test]
    fn overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("FAMSYNC_MAX_RETRIES", "5"),
            ("FAMSYNC_DEFAULT_PRIORITY", "-2"),
            ("FAMSYNC_BACKOFF_BASE_MS", "250"),
            ("FAMSYNC_BACKOFF_MAX_MS", "60000"),
            ("FAMSYNC_SYNC_ON_ENQUEUE", "false"),
            ("FAMSYNC_SYNC_ON_RECONNECT", "0"),
        ]))
        .unwrap();

        assert_eq!(config.default_max_retries, 5);
        assert_eq!(config.default_priority, -2);
        assert_eq!(config.backoff_base, Duration::from_millis(250));
        assert_eq!(config.backoff_max, Some(Duration::from_secs(60)));
        assert!(!config.sync_on_enqueue);
        assert!(!config.sync_on_reconnect);
        assert_eq!(config.backoff().delay(2), Duration::from_secs(1));
    }

    #[test]
    fn invalid_values() {
        let result = EngineConfig::from_lookup(lookup(&[("FAMSYNC_MAX_RETRIES", "three")]));
        assert_eq!(
            result,
            Err(ConfigError::Invalid("FAMSYNC_MAX_RETRIES", "three".into()))
        );

        let result = EngineConfig::from_lookup(lookup(&[("FAMSYNC_SYNC_ON_ENQUEUE", "maybe")]));
        assert!(result.is_err());
    }
}
