//! Host configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via CORRFLOW_CONFIG)
//! 3. Environment variables

use corrflow_core::DispatchOptions;
use corrflow_storage::StoreOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Host configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub dispatch: DispatchConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("CORRFLOW_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    fn apply_env_overrides(&mut self) {
        self.logging.apply_env_overrides();
        self.dispatch.apply_env_overrides();
        self.storage.apply_env_overrides();
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` still wins.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(filter) = std::env::var("CORRFLOW_LOG") {
            if !filter.is_empty() {
                self.filter = filter;
            }
        }
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Stage an update carrying the unchanged state when an existing instance
    /// receives a message its state has no rule for.
    pub persist_unchanged_state: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            persist_unchanged_state: true,
        }
    }
}

impl DispatchConfig {
    fn apply_env_overrides(&mut self) {
        if let Some(flag) = env_flag("CORRFLOW_PERSIST_UNCHANGED") {
            self.persist_unchanged_state = flag;
        }
    }

    pub fn options(&self) -> DispatchOptions {
        DispatchOptions {
            persist_unchanged_state: self.persist_unchanged_state,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Version-check staged updates at commit.
    pub optimistic_concurrency: bool,
    /// Snapshot loaded at start (if present) and written at shutdown.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            optimistic_concurrency: true,
            snapshot_path: None,
        }
    }
}

impl StorageConfig {
    fn apply_env_overrides(&mut self) {
        if let Some(flag) = env_flag("CORRFLOW_OPTIMISTIC_CONCURRENCY") {
            self.optimistic_concurrency = flag;
        }

        if let Ok(path) = std::env::var("CORRFLOW_SNAPSHOT_PATH") {
            self.snapshot_path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }
    }

    pub fn options(&self) -> StoreOptions {
        StoreOptions {
            optimistic_concurrency: self.optimistic_concurrency,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("failed to parse config file '{}': {}", .0.display(), .1)]
    Parse(PathBuf, #[source] serde_yaml::Error),
}
