//! Configuration loader.
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If incomplete, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `MOODLOG_DB_PATH`: Database file path (required)
//! - `MOODLOG_DB_POOL_SIZE`: Connection pool size
//! - `MOODLOG_COLLECTOR_URL`: Collector base URL (required)
//! - `MOODLOG_COLLECTOR_TIMEOUT_SECS`: Per-request timeout in seconds
//! - `MOODLOG_COLLECTOR_API_KEY`: Optional bearer token
//! - `MOODLOG_QUEUE_MAX_RETRIES`: Attempts before an item fails terminally
//! - `MOODLOG_QUEUE_BASE_RETRY_DELAY_MS`: Base backoff delay in milliseconds
//! - `MOODLOG_QUEUE_BATCH_SIZE`: Store page size per processing pass
//!
//! ## File Locations
//! Probes `config.{json,toml}` and `moodlog.{json,toml}` in the working
//! directory, its two parents, and next to the executable.

use std::path::{Path, PathBuf};

use moodlog_domain::{
    CollectorConfig, Config, DatabaseConfig, MoodlogError, QueueConfig, Result,
};

/// Load configuration with automatic fallback strategy.
///
/// Environment variables win; if the required ones are missing the loader
/// probes the standard file locations.
pub fn load() -> Result<Config> {
    // Pick up a local .env before reading the environment.
    dotenvy::dotenv().ok();

    match load_from_env() {
        Ok(config) => {
            tracing::info!("configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "environment incomplete, trying config file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables.
///
/// `MOODLOG_DB_PATH` and `MOODLOG_COLLECTOR_URL` are required; the queue
/// tuning variables fall back to their defaults when unset.
pub fn load_from_env() -> Result<Config> {
    let db_path = env_var("MOODLOG_DB_PATH")?;
    let pool_size = env_parse("MOODLOG_DB_POOL_SIZE", 4)?;

    let collector_url = env_var("MOODLOG_COLLECTOR_URL")?;
    let timeout_secs = env_parse("MOODLOG_COLLECTOR_TIMEOUT_SECS", 30)?;
    let api_key = std::env::var("MOODLOG_COLLECTOR_API_KEY").ok();

    let defaults = QueueConfig::default();
    let queue = QueueConfig {
        max_retries: env_parse("MOODLOG_QUEUE_MAX_RETRIES", defaults.max_retries)?,
        base_retry_delay_ms: env_parse(
            "MOODLOG_QUEUE_BASE_RETRY_DELAY_MS",
            defaults.base_retry_delay_ms,
        )?,
        batch_size: env_parse("MOODLOG_QUEUE_BATCH_SIZE", defaults.batch_size)?,
    };

    let config = Config {
        database: DatabaseConfig { path: db_path, pool_size },
        queue,
        collector: CollectorConfig { base_url: collector_url, timeout_secs, api_key },
    };
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file.
///
/// If `path` is `None`, probes the standard locations. Format is detected
/// by file extension.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(MoodlogError::Config(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            MoodlogError::Config("no config file found in any of the standard locations".into())
        })?,
    };

    tracing::info!(path = %config_path.display(), "loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| MoodlogError::Config(format!("failed to read config file: {e}")))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| MoodlogError::Config(format!("invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| MoodlogError::Config(format!("invalid JSON format: {e}"))),
        _ => Err(MoodlogError::Config(format!("unsupported config format: {extension}"))),
    }
}

/// Probe the standard locations for a configuration file.
///
/// Returns the first existing candidate, or `None`.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        for dir in [cwd.clone(), cwd.join(".."), cwd.join("../..")] {
            candidates.push(dir.join("config.json"));
            candidates.push(dir.join("config.toml"));
            candidates.push(dir.join("moodlog.json"));
            candidates.push(dir.join("moodlog.toml"));
        }
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.push(exe_dir.join("config.json"));
            candidates.push(exe_dir.join("config.toml"));
            candidates.push(exe_dir.join("moodlog.json"));
            candidates.push(exe_dir.join("moodlog.toml"));
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| MoodlogError::Config(format!("missing required environment variable: {key}")))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| MoodlogError::Config(format!("invalid value for {key}: {e}"))),
        Err(_) => Ok(default),
    }
}
