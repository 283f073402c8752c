//! Tier cache configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CacheError, CacheResult, ConfigError};

/// Timeouts, batch caps and logging switches for the tier cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierCacheConfig {
    /// Deadline for one batched distributed-cache read.
    #[serde(with = "millis")]
    pub get_timeout: Duration,
    /// Write deadline for payloads at or below `put_timeout_threshold`.
    #[serde(with = "millis")]
    pub put_timeout_small: Duration,
    /// Write deadline for payloads above `put_timeout_threshold`.
    #[serde(with = "millis")]
    pub put_timeout_large: Duration,
    /// Aggregate payload size, in bytes, that selects the large write deadline.
    pub put_timeout_threshold: usize,
    /// Keys per primary-store get call.
    pub get_batch_limit: usize,
    /// Entities per primary-store put call.
    pub put_batch_limit: usize,
    /// Keys per primary-store delete call.
    pub delete_batch_limit: usize,
    /// Prepended to every distributed-cache key; bump it to orphan old records.
    pub key_prefix: String,
    /// Log collaborator failures.
    pub log_errors: bool,
    /// Log distributed-cache timeouts.
    pub log_timeout_errors: bool,
}

impl Default for TierCacheConfig {
    fn default() -> Self {
        Self {
            get_timeout: Duration::from_millis(10),
            put_timeout_small: Duration::from_millis(5),
            put_timeout_large: Duration::from_millis(15),
            put_timeout_threshold: 50 * 1024,
            get_batch_limit: 1000,
            put_batch_limit: 500,
            delete_batch_limit: 500,
            key_prefix: "g2:".to_string(),
            log_errors: true,
            log_timeout_errors: false,
        }
    }
}

impl TierCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_get_timeout(mut self, timeout: Duration) -> Self {
        self.get_timeout = timeout;
        self
    }

    pub fn with_put_timeouts(mut self, small: Duration, large: Duration) -> Self {
        self.put_timeout_small = small;
        self.put_timeout_large = large;
        self
    }

    pub fn with_put_timeout_threshold(mut self, bytes: usize) -> Self {
        self.put_timeout_threshold = bytes;
        self
    }

    pub fn with_batch_limits(mut self, get: usize, put: usize, delete: usize) -> Self {
        self.get_batch_limit = get;
        self.put_batch_limit = put;
        self.delete_batch_limit = delete;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_logging(mut self, errors: bool, timeouts: bool) -> Self {
        self.log_errors = errors;
        self.log_timeout_errors = timeouts;
        self
    }

    /// Write deadline for a distributed-cache write of `payload_bytes`.
    pub fn put_timeout(&self, payload_bytes: usize) -> Duration {
        if payload_bytes > self.put_timeout_threshold {
            self.put_timeout_large
        } else {
            self.put_timeout_small
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - all timeouts are positive
    /// - the small write deadline does not exceed the large one
    /// - all batch limits are positive
    /// - the key prefix is non-empty
    pub fn validate(&self) -> CacheResult<()> {
        let timeouts = [
            ("get_timeout", self.get_timeout),
            ("put_timeout_small", self.put_timeout_small),
            ("put_timeout_large", self.put_timeout_large),
        ];
        for (field, value) in timeouts {
            if value.is_zero() {
                return Err(invalid(field, format!("{value:?}"), "must be positive"));
            }
        }

        if self.put_timeout_small > self.put_timeout_large {
            return Err(invalid(
                "put_timeout_small",
                format!("{:?}", self.put_timeout_small),
                "must not exceed put_timeout_large",
            ));
        }

        let limits = [
            ("get_batch_limit", self.get_batch_limit),
            ("put_batch_limit", self.put_batch_limit),
            ("delete_batch_limit", self.delete_batch_limit),
        ];
        for (field, value) in limits {
            if value == 0 {
                return Err(invalid(field, value.to_string(), "must be greater than 0"));
            }
        }

        if self.key_prefix.is_empty() {
            return Err(invalid("key_prefix", String::new(), "must not be empty"));
        }

        Ok(())
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `STRATA_GET_TIMEOUT_MS`: distributed-cache read deadline (default: 10)
    /// - `STRATA_PUT_TIMEOUT_SMALL_MS`: small-payload write deadline (default: 5)
    /// - `STRATA_PUT_TIMEOUT_LARGE_MS`: large-payload write deadline (default: 15)
    /// - `STRATA_PUT_TIMEOUT_THRESHOLD`: payload bytes selecting the large deadline (default: 51200)
    /// - `STRATA_GET_BATCH_LIMIT`: keys per primary-store get (default: 1000)
    /// - `STRATA_PUT_BATCH_LIMIT`: entities per primary-store put (default: 500)
    /// - `STRATA_DELETE_BATCH_LIMIT`: keys per primary-store delete (default: 500)
    /// - `STRATA_KEY_PREFIX`: distributed-cache key prefix (default: "g2:")
    /// - `STRATA_LOG_ERRORS`: "true" or "false" (default: true)
    /// - `STRATA_LOG_TIMEOUT_ERRORS`: "true" or "false" (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            get_timeout: env_millis("STRATA_GET_TIMEOUT_MS").unwrap_or(defaults.get_timeout),
            put_timeout_small: env_millis("STRATA_PUT_TIMEOUT_SMALL_MS")
                .unwrap_or(defaults.put_timeout_small),
            put_timeout_large: env_millis("STRATA_PUT_TIMEOUT_LARGE_MS")
                .unwrap_or(defaults.put_timeout_large),
            put_timeout_threshold: env_parse("STRATA_PUT_TIMEOUT_THRESHOLD")
                .unwrap_or(defaults.put_timeout_threshold),
            get_batch_limit: env_parse("STRATA_GET_BATCH_LIMIT").unwrap_or(defaults.get_batch_limit),
            put_batch_limit: env_parse("STRATA_PUT_BATCH_LIMIT").unwrap_or(defaults.put_batch_limit),
            delete_batch_limit: env_parse("STRATA_DELETE_BATCH_LIMIT")
                .unwrap_or(defaults.delete_batch_limit),
            key_prefix: std::env::var("STRATA_KEY_PREFIX")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.key_prefix),
            log_errors: std::env::var("STRATA_LOG_ERRORS")
                .ok()
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(defaults.log_errors),
            log_timeout_errors: std::env::var("STRATA_LOG_TIMEOUT_ERRORS")
                .ok()
                .map(|s| s.to_lowercase() == "true")
                .unwrap_or(defaults.log_timeout_errors),
        }
    }

    /// Parse a TOML document; missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> CacheResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }
}

fn invalid(field: &str, value: String, reason: &str) -> CacheError {
    CacheError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value,
        reason: reason.to_string(),
    })
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn env_millis(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_millis)
}

/// Durations as whole milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TierCacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.key_prefix, "g2:");
        assert_eq!(config.put_batch_limit, 500);
        assert!(config.log_errors);
        assert!(!config.log_timeout_errors);
    }

    #[test]
    fn test_put_timeout_tiers() {
        let config = TierCacheConfig::default();
        assert_eq!(config.put_timeout(100), Duration::from_millis(5));
        assert_eq!(config.put_timeout(50 * 1024), Duration::from_millis(5));
        assert_eq!(config.put_timeout(50 * 1024 + 1), Duration::from_millis(15));
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let config = TierCacheConfig::new().with_batch_limits(1000, 0, 500);
        let err = config.validate().unwrap_err();
        match err {
            CacheError::Config(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "put_batch_limit")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_rejects_inverted_put_timeouts() {
        let config = TierCacheConfig::new()
            .with_put_timeouts(Duration::from_millis(20), Duration::from_millis(10));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = TierCacheConfig::new().with_get_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = TierCacheConfig::from_toml_str(
            "get_timeout = 25\nkey_prefix = \"g3:\"\nlog_timeout_errors = true\n",
        )
        .unwrap();
        assert_eq!(config.get_timeout, Duration::from_millis(25));
        assert_eq!(config.key_prefix, "g3:");
        assert!(config.log_timeout_errors);
        assert_eq!(config.get_batch_limit, 1000);
    }

    #[test]
    fn test_from_toml_rejects_invalid() {
        assert!(TierCacheConfig::from_toml_str("get_batch_limit = 0").is_err());
        assert!(TierCacheConfig::from_toml_str("get_timeout = \"soon\"").is_err());
    }

    #[test]
    fn test_serde_round_trip_json() {
        let config = TierCacheConfig::new().with_key_prefix("v9:");
        let json = serde_json::to_string(&config).unwrap();
        let back: TierCacheConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
