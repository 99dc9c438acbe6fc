//! Runtime configuration.
//!
//! Loaded from YAML files and environment variables into a single
//! [`Config`]. Every section has defaults, so an empty configuration runs
//! against the in-memory store.

mod runtime;
mod storage;

use std::collections::HashMap;

use serde::Deserialize;

pub use runtime::{QueueConfig, RetryConfig};
pub use storage::{StorageConfig, StorageType};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "dynaforge.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "DYNAFORGE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "DYNAFORGE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "DYNAFORGE_LOG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    /// Logical table name to physical table name. Unlisted tables use
    /// their logical name. Keys match case-insensitively, since file and
    /// environment sources lowercase them.
    pub tables: HashMap<String, String>,
    pub queue: QueueConfig,
    pub retry: RetryConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `dynaforge.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `DYNAFORGE_CONFIG` environment variable (if set)
    /// 4. Environment variables with `DYNAFORGE` prefix and `__` separator
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Self = config.try_deserialize()?;
        config.tables = normalize_tables(&config.tables);
        Ok(config)
    }

    /// Physical name of a logical table.
    pub fn physical_table(&self, logical: &str) -> String {
        self.tables
            .get(&logical.to_lowercase())
            .or_else(|| self.tables.get(logical))
            .cloned()
            .unwrap_or_else(|| logical.to_string())
    }

    /// Create config for testing: immediate redelivery and short backoff.
    pub fn for_test() -> Self {
        Self {
            queue: QueueConfig {
                visibility_timeout_secs: 0,
                ..QueueConfig::default()
            },
            retry: RetryConfig {
                min_delay_ms: 1,
                max_delay_ms: 5,
                ..RetryConfig::default()
            },
            ..Self::default()
        }
    }
}

/// Lowercase the logical names of a table override map.
pub fn normalize_tables(tables: &HashMap<String, String>) -> HashMap<String, String> {
    tables
        .iter()
        .map(|(logical, physical)| (logical.to_lowercase(), physical.clone()))
        .collect()
}

#[cfg(test)]
mod tests;
