//! Configuration structures shared across the workspace.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{MoodlogError, Result};

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    pub collector: CollectorConfig,
}

impl Config {
    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        self.queue.validate()?;
        self.collector.validate()
    }
}

/// Local SQLite database settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path.
    pub path: String,
    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl DatabaseConfig {
    fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(MoodlogError::Config("database path must not be empty".into()));
        }
        if self.pool_size == 0 {
            return Err(MoodlogError::Config("database pool size must be greater than 0".into()));
        }
        Ok(())
    }
}

/// Upload queue tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Attempts before an item becomes terminally failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff, milliseconds.
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,
    /// Page size when scanning the store for ready items.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl QueueConfig {
    /// Base retry delay as a [`Duration`].
    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    /// Validate queue settings.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(MoodlogError::Config("max_retries must be greater than 0".into()));
        }
        if self.base_retry_delay_ms == 0 {
            return Err(MoodlogError::Config("base_retry_delay_ms must be greater than 0".into()));
        }
        if self.batch_size == 0 {
            return Err(MoodlogError::Config("batch_size must be greater than 0".into()));
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
            batch_size: default_batch_size(),
        }
    }
}

/// Remote collector endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Base URL, e.g. `https://collector.moodlog.app/v1`.
    pub base_url: String,
    /// Per-request timeout, seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
    /// Optional bearer token for the collector API.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl CollectorConfig {
    /// Request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(MoodlogError::Config("collector base_url must not be empty".into()));
        }
        if self.timeout_secs == 0 {
            return Err(MoodlogError::Config("collector timeout must be greater than 0".into()));
        }
        Ok(())
    }
}

fn default_pool_size() -> u32 {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_retry_delay_ms() -> u64 {
    5_000
}

fn default_batch_size() -> usize {
    5
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            database: DatabaseConfig { path: "moodlog.db".into(), pool_size: 4 },
            queue: QueueConfig::default(),
            collector: CollectorConfig {
                base_url: "https://collector.moodlog.app/v1".into(),
                timeout_secs: 30,
                api_key: None,
            },
        }
    }

    #[test]
    fn defaults_match_product_tuning() {
        let queue = QueueConfig::default();
        assert_eq!(queue.max_retries, 3);
        assert_eq!(queue.base_retry_delay_ms, 5_000);
        assert_eq!(queue.batch_size, 5);
    }

    #[test]
    fn valid_config_passes() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn empty_database_path_is_rejected() {
        let mut cfg = config();
        cfg.database.path = String::new();
        assert!(matches!(cfg.validate(), Err(MoodlogError::Config(_))));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut cfg = config();
        cfg.queue.batch_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut cfg = config();
        cfg.collector.timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn toml_with_sparse_queue_section_uses_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [database]
            path = "data/moodlog.db"

            [collector]
            base_url = "https://collector.moodlog.app/v1"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.database.pool_size, 4);
        assert_eq!(cfg.queue.max_retries, 3);
        assert_eq!(cfg.collector.timeout_secs, 30);
    }
}
