//! Configuration loading.
//!
//! Settings are resolved in three layers, later ones winning:
//!
//! 1. built-in defaults,
//! 2. a JSON file (`config.json`, or the path in `QUEUECTL_CONFIG`),
//! 3. `QUEUECTL_*` environment variables (`QUEUECTL_DB_PATH`, `QUEUECTL_BACKOFF_BASE`, ...).
//!
//! # Example
//!
//! ```ignore
//! use queuectl_jobs::config::{load_dotenv, QueueConfig};
//!
//! load_dotenv();
//! let config = QueueConfig::load()?;
//! println!("jobs live in {}", config.db_path.display());
//! ```

use crate::worker::WorkerOptions;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config file, relative to the working directory.
pub const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "QUEUECTL_CONFIG";

/// Prefix for per-setting environment overrides.
pub const ENV_PREFIX: &str = "QUEUECTL_";

/// Keys accepted by [`set_value`].
pub const KNOWN_KEYS: [&str; 6] = [
    "db_path",
    "backoff_base",
    "default_max_retries",
    "worker_poll_interval",
    "pid_file",
    "worker_log",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Environment configuration error: {0}")]
    Env(#[from] envy::Error),

    #[error("Unknown config key: {0} (expected one of {keys})", keys = KNOWN_KEYS.join(", "))]
    UnknownKey(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Effective queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub db_path: PathBuf,
    pub backoff_base: u32,
    pub default_max_retries: u32,
    /// Seconds a worker sleeps when nothing is eligible.
    pub worker_poll_interval: u64,
    pub pid_file: PathBuf,
    pub worker_log: PathBuf,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/jobs.db"),
            backoff_base: 2,
            default_max_retries: 3,
            worker_poll_interval: 1,
            pid_file: PathBuf::from("data/workers.pids"),
            worker_log: PathBuf::from("data/workers.log"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    db_path: Option<PathBuf>,
    backoff_base: Option<u32>,
    default_max_retries: Option<u32>,
    worker_poll_interval: Option<u64>,
    pid_file: Option<PathBuf>,
    worker_log: Option<PathBuf>,
}

impl QueueConfig {
    /// Location of the config file: `$QUEUECTL_CONFIG` or `config.json`.
    pub fn config_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
    }

    /// Resolve all layers and make sure the database directory exists.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::config_path())
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env()?;
        if let Some(dir) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        Ok(config)
    }

    /// Defaults overlaid with the file at `path`; a missing file is not an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Overlay `QUEUECTL_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        let env: EnvOverrides = envy::prefixed(ENV_PREFIX).from_env()?;
        if let Some(v) = env.db_path {
            self.db_path = v;
        }
        if let Some(v) = env.backoff_base {
            self.backoff_base = v;
        }
        if let Some(v) = env.default_max_retries {
            self.default_max_retries = v;
        }
        if let Some(v) = env.worker_poll_interval {
            self.worker_poll_interval = v;
        }
        if let Some(v) = env.pid_file {
            self.pid_file = v;
        }
        if let Some(v) = env.worker_log {
            self.worker_log = v;
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.worker_poll_interval)
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            poll_interval: self.poll_interval(),
            backoff_base: self.backoff_base,
        }
    }
}

/// Persist one setting to the config file at `path`.
///
/// Integer-looking values are stored as numbers, everything else as strings.
/// Other keys already in the file are preserved. Returns the file layer after
/// the update (environment overrides are not applied).
pub fn set_value(path: impl AsRef<Path>, key: &str, raw: &str) -> Result<QueueConfig, ConfigError> {
    if !KNOWN_KEYS.contains(&key) {
        return Err(ConfigError::UnknownKey(key.to_string()));
    }
    let path = path.as_ref();

    let mut map: Map<String, Value> = match std::fs::read_to_string(path) {
        Ok(existing) => serde_json::from_str(&existing)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
        Err(e) => return Err(e.into()),
    };
    let value = raw
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(raw));
    map.insert(key.to_string(), value);

    let config: QueueConfig =
        serde_json::from_value(Value::Object(map.clone())).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;

    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&map)?)?;
    tracing::debug!(key, path = %path.display(), "config updated");
    Ok(config)
}

/// Load variables from a `.env` file in the working directory, if present.
/// Existing environment variables take precedence.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}
