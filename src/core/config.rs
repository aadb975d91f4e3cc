//! Configuration parsing and validation.
//!
//! kinestore configuration is loaded from TOML files with CLI overrides.
//! Every field carries a default, so an empty file is a valid configuration.

use crate::storage::admission::AdmissionPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level kinestore configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Backing database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Admission control configuration.
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// SQL log (poll, watch, compaction) configuration.
    #[serde(default)]
    pub log: LogConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Backing database and connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path.
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum open connections.
    #[serde(default = "default_max_open_connections")]
    pub max_open_connections: usize,

    /// Maximum idle connections kept for reuse.
    #[serde(default = "default_max_idle_connections")]
    pub max_idle_connections: usize,

    /// Maximum connection lifetime in seconds (0 = unbounded).
    #[serde(default = "default_connection_max_lifetime_seconds")]
    pub connection_max_lifetime_seconds: u64,

    /// Engine busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Serialize writes behind a single coarse lock.
    #[serde(default = "default_lock_writes")]
    pub lock_writes: bool,

    /// Connection attempts made by Open before giving up.
    #[serde(default = "default_open_attempts")]
    pub open_attempts: u32,

    /// Spacing between Open attempts in milliseconds.
    #[serde(default = "default_open_retry_interval_ms")]
    pub open_retry_interval_ms: u64,

    /// Attempts made for a statement failing with a transient error.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Use last-insert-id instead of `RETURNING id` for inserts.
    #[serde(default)]
    pub last_insert_id: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_open_connections: default_max_open_connections(),
            max_idle_connections: default_max_idle_connections(),
            connection_max_lifetime_seconds: default_connection_max_lifetime_seconds(),
            busy_timeout_ms: default_busy_timeout_ms(),
            lock_writes: default_lock_writes(),
            open_attempts: default_open_attempts(),
            open_retry_interval_ms: default_open_retry_interval_ms(),
            max_retries: default_max_retries(),
            last_insert_id: false,
        }
    }
}

impl DatabaseConfig {
    /// Connection lifetime bound, if any.
    pub fn connection_max_lifetime(&self) -> Option<Duration> {
        if self.connection_max_lifetime_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.connection_max_lifetime_seconds))
        }
    }
}

/// Admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Policy name: "allow-all" or "limit".
    #[serde(default = "default_admission_policy")]
    pub policy: String,

    /// Concurrent operations admitted by the "limit" policy.
    #[serde(default = "default_admission_max_concurrent")]
    pub max_concurrent: usize,

    /// Only gate write queries under the "limit" policy.
    #[serde(default)]
    pub only_write_queries: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            policy: default_admission_policy(),
            max_concurrent: default_admission_max_concurrent(),
            only_write_queries: false,
        }
    }
}

impl AdmissionConfig {
    /// Resolve the configured policy.
    ///
    /// Unknown policy names degrade to allow-all.
    pub fn resolve(&self) -> AdmissionPolicy {
        match self.policy.as_str() {
            "limit" => AdmissionPolicy::Limit {
                max_concurrent: self.max_concurrent,
                only_write_queries: self.only_write_queries,
            },
            "allow-all" => AdmissionPolicy::AllowAll,
            other => {
                tracing::warn!(
                    policy = %other,
                    "unknown admission control policy, falling back to allow-all"
                );
                AdmissionPolicy::AllowAll
            }
        }
    }
}

/// SQL log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Poll timer period in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Rows fetched per poll.
    #[serde(default = "default_poll_batch_size")]
    pub poll_batch_size: i64,

    /// Compaction period in seconds.
    #[serde(default = "default_compact_interval_seconds")]
    pub compact_interval_seconds: u64,

    /// How long a revision gap may persist before it is filled.
    #[serde(default = "default_gap_fill_threshold_ms")]
    pub gap_fill_threshold_ms: u64,

    /// Capacity of the append notification queue.
    #[serde(default = "default_notify_queue_capacity")]
    pub notify_queue_capacity: usize,

    /// Per-subscriber batch buffer.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            poll_batch_size: default_poll_batch_size(),
            compact_interval_seconds: default_compact_interval_seconds(),
            gap_fill_threshold_ms: default_gap_fill_threshold_ms(),
            notify_queue_capacity: default_notify_queue_capacity(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl LogConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn compact_interval(&self) -> Duration {
        Duration::from_secs(self.compact_interval_seconds)
    }

    pub fn gap_fill_threshold(&self) -> Duration {
        Duration::from_millis(self.gap_fill_threshold_ms)
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_database_path() -> String {
    "data/kine.db".to_string()
}

fn default_max_open_connections() -> usize {
    8
}

fn default_max_idle_connections() -> usize {
    4
}

fn default_connection_max_lifetime_seconds() -> u64 {
    300
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_lock_writes() -> bool {
    true
}

fn default_open_attempts() -> u32 {
    300
}

fn default_open_retry_interval_ms() -> u64 {
    1_000
}

fn default_max_retries() -> u32 {
    500
}

fn default_admission_policy() -> String {
    "allow-all".to_string()
}

fn default_admission_max_concurrent() -> usize {
    64
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_poll_batch_size() -> i64 {
    500
}

fn default_compact_interval_seconds() -> u64 {
    300
}

fn default_gap_fill_threshold_ms() -> u64 {
    1_000
}

fn default_notify_queue_capacity() -> usize {
    1_024
}

fn default_subscriber_buffer() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref database) = overrides.database {
            self.database.path = database.clone();
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_database()?;
        self.validate_log()?;
        self.validate_admission()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_database(&self) -> Result<()> {
        if self.database.path.is_empty() {
            anyhow::bail!("database.path must not be empty");
        }
        if self.database.max_open_connections == 0 {
            anyhow::bail!("database.max_open_connections must be > 0");
        }
        if self.database.max_idle_connections > self.database.max_open_connections {
            anyhow::bail!(
                "database.max_idle_connections ({}) cannot exceed max_open_connections ({})",
                self.database.max_idle_connections,
                self.database.max_open_connections
            );
        }
        if self.database.open_attempts == 0 {
            anyhow::bail!("database.open_attempts must be > 0");
        }
        if self.database.max_retries == 0 {
            anyhow::bail!("database.max_retries must be > 0");
        }
        Ok(())
    }

    fn validate_log(&self) -> Result<()> {
        if self.log.poll_interval_ms == 0 {
            anyhow::bail!("log.poll_interval_ms must be > 0");
        }
        if self.log.poll_batch_size <= 0 {
            anyhow::bail!("log.poll_batch_size must be > 0");
        }
        if self.log.compact_interval_seconds == 0 {
            anyhow::bail!("log.compact_interval_seconds must be > 0");
        }
        if self.log.notify_queue_capacity == 0 || self.log.subscriber_buffer == 0 {
            anyhow::bail!("log.notify_queue_capacity and log.subscriber_buffer must be > 0");
        }
        Ok(())
    }

    fn validate_admission(&self) -> Result<()> {
        // A zero limit would deny every call.
        if self.admission.policy == "limit" && self.admission.max_concurrent == 0 {
            anyhow::bail!("admission.max_concurrent must be > 0 when policy is \"limit\"");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override database path.
    pub database: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.database.path, "data/kine.db");
        assert_eq!(config.database.open_attempts, 300);
        assert_eq!(config.database.max_retries, 500);
        assert_eq!(config.log.compact_interval(), Duration::from_secs(300));
        assert_eq!(config.log.poll_batch_size, 500);
        assert_eq!(config.admission.resolve(), AdmissionPolicy::AllowAll);
    }

    #[test]
    fn limit_policy_resolves() {
        let config = Config::from_toml(
            r#"
[admission]
policy = "limit"
max_concurrent = 3
only_write_queries = true
"#,
        )
        .unwrap();
        assert_eq!(
            config.admission.resolve(),
            AdmissionPolicy::Limit {
                max_concurrent: 3,
                only_write_queries: true
            }
        );
    }

    #[test]
    fn zero_limit_is_rejected() {
        let err = Config::from_toml("[admission]\npolicy = \"limit\"\nmax_concurrent = 0\n")
            .unwrap_err();
        assert!(err.to_string().contains("admission.max_concurrent"));

        // Unused under allow-all.
        Config::from_toml("[admission]\nmax_concurrent = 0\n").unwrap();
    }

    #[test]
    fn unknown_policy_degrades_to_allow_all() {
        let config = Config::from_toml("[admission]\npolicy = \"token-bucket\"\n").unwrap();
        assert_eq!(config.admission.resolve(), AdmissionPolicy::AllowAll);
    }

    #[test]
    fn idle_above_open_is_rejected() {
        let err = Config::from_toml(
            "[database]\nmax_open_connections = 2\nmax_idle_connections = 3\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_idle_connections"));
    }

    #[test]
    fn overrides_apply() {
        let mut config = Config::default();
        config.apply_overrides(&ConfigOverrides {
            log_level: Some("debug".to_string()),
            database: Some("/tmp/x.db".to_string()),
        });
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.database.path, "/tmp/x.db");
    }
}
