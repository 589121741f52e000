//! Configuration types

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default lifetime of an entry (14 days).
pub const DEFAULT_EXPIRATION_SECS: u64 = 14 * 24 * 3600;
/// Minimum time between two sweeps (4 hours).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 4 * 3600;
/// Attempts for a persistent-tier statement under contention.
pub const DEFAULT_MAX_RETRIES: u32 = 10;
/// Pause between two attempts.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 100;
/// SQLite busy handler wait inside a single attempt. Longer contention is
/// ridden out by the retry loop, which checks the abort signal.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 50;
/// Poll period while `close` waits for in-flight work.
pub const DEFAULT_CLOSE_POLL_MS: u64 = 25;
/// Upper bound for the `close` wait.
pub const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_DB_FILE_NAME: &str = "simplecache.db";
pub const DEFAULT_KEY_PREFIX: &str = "simplecache.";
pub const DEFAULT_LOG_PREFIX: &str = "SimpleCache";

/// Cache configuration.
///
/// `db_dir` is the embedding host's writable profile directory. Without it
/// the cache runs on the process-local tier only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub db_dir: Option<PathBuf>,
    pub db_file_name: String,
    pub default_expiration: Duration,
    pub sweep_interval: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub busy_timeout: Duration,
    pub close_poll_interval: Duration,
    pub close_timeout: Duration,
    pub enable_local_tier: bool,
    /// Namespace for process-local slots; always ends with `.`.
    pub key_prefix: String,
    pub log_prefix: String,
    /// Salt folded into every checksum; changing it invalidates all
    /// checksummed entries without a flush.
    pub global_checksum: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            db_dir: None,
            db_file_name: DEFAULT_DB_FILE_NAME.to_string(),
            default_expiration: Duration::from_secs(DEFAULT_EXPIRATION_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            close_poll_interval: Duration::from_millis(DEFAULT_CLOSE_POLL_MS),
            close_timeout: Duration::from_secs(DEFAULT_CLOSE_TIMEOUT_SECS),
            enable_local_tier: true,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            log_prefix: DEFAULT_LOG_PREFIX.to_string(),
            global_checksum: None,
        }
    }
}

impl CacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config from environment variables.
    ///
    /// # Environment Variables
    /// - `SIMPLECACHE_DB_DIR`: directory holding the persistent file (default: none)
    /// - `SIMPLECACHE_DEFAULT_EXPIRATION_SECS`: entry lifetime (default: 14 days)
    /// - `SIMPLECACHE_SWEEP_INTERVAL_SECS`: time between sweeps (default: 4 hours)
    /// - `SIMPLECACHE_MAX_RETRIES`: attempts under contention (default: 10)
    /// - `SIMPLECACHE_RETRY_DELAY_MS`: pause between attempts (default: 100)
    /// - `SIMPLECACHE_ENABLE_LOCAL`: use the process-local tier (default: true)
    /// - `SIMPLECACHE_GLOBAL_CHECKSUM`: checksum salt (default: none)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let db_dir = std::env::var("SIMPLECACHE_DB_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let default_expiration = std::env::var("SIMPLECACHE_DEFAULT_EXPIRATION_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.default_expiration);

        let sweep_interval = std::env::var("SIMPLECACHE_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);

        let max_retries = std::env::var("SIMPLECACHE_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_retries);

        let retry_delay = std::env::var("SIMPLECACHE_RETRY_DELAY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_delay);

        let enable_local_tier = std::env::var("SIMPLECACHE_ENABLE_LOCAL")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        let global_checksum = std::env::var("SIMPLECACHE_GLOBAL_CHECKSUM")
            .ok()
            .filter(|s| !s.is_empty());

        Self {
            db_dir,
            default_expiration,
            sweep_interval,
            max_retries,
            retry_delay,
            enable_local_tier,
            global_checksum,
            ..defaults
        }
    }

    /// Set the directory of the persistent file.
    pub fn with_db_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.db_dir = Some(dir.into());
        self
    }

    /// Set the default entry lifetime.
    pub fn with_default_expiration(mut self, duration: Duration) -> Self {
        self.default_expiration = duration;
        self
    }

    /// Set the minimum time between sweeps.
    pub fn with_sweep_interval(mut self, duration: Duration) -> Self {
        self.sweep_interval = duration;
        self
    }

    /// Set the retry policy for contended writes.
    pub fn with_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = delay;
        self
    }

    /// Set the SQLite busy handler timeout for one attempt.
    ///
    /// The persistent tier never waits longer than `retry_delay` per attempt,
    /// whatever this is set to.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Enable or disable the process-local tier.
    pub fn with_local_tier(mut self, enabled: bool) -> Self {
        self.enable_local_tier = enabled;
        self
    }

    /// Set the slot namespace. A trailing `.` is appended when missing.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.ends_with('.') {
            prefix.push('.');
        }
        self.key_prefix = prefix;
        self
    }

    /// Set the tag attached to every log event.
    pub fn with_log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = prefix.into();
        self
    }

    /// Set the global checksum salt.
    pub fn with_global_checksum(mut self, salt: impl Into<String>) -> Self {
        self.global_checksum = Some(salt.into()).filter(|s: &String| !s.is_empty());
        self
    }

    /// Full path of the persistent file, if a directory is configured.
    pub fn db_path(&self) -> Option<PathBuf> {
        self.db_dir.as_ref().map(|dir| dir.join(&self.db_file_name))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_retries".to_string(),
                value: self.max_retries.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "sweep_interval".to_string(),
                value: format!("{:?}", self.sweep_interval),
                reason: "must be positive".to_string(),
            });
        }
        if self.db_file_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "db_file_name".to_string(),
                value: self.db_file_name.clone(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
