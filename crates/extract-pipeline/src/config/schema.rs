use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::{default_database_path, Database, DatabaseOptions};
use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier_mapping: Option<IdentifierMappingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Defaults to `~/.extract-pipeline/data/jobs.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Upper bound on any single storage call.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(default_database_path)
    }

    pub fn options(&self) -> DatabaseOptions {
        DatabaseOptions {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
        }
    }

    /// Opens the configured database, running migrations.
    pub fn open(&self) -> Result<Database> {
        let path = self.resolved_path().ok_or_else(|| ConfigError::Validation {
            message: "No database path configured and no home directory found".to_string(),
        })?;
        Ok(Database::open_with_options(Path::new(&path), &self.options())?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Table the identifier swap cache loads from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierMappingConfig {
    #[serde(default = "default_mapping_table")]
    pub table: String,
    #[serde(default = "default_swap_column")]
    pub swap_column: String,
    #[serde(default = "default_replacement_column")]
    pub replacement_column: String,
}

fn default_mapping_table() -> String {
    "identifier_map".to_string()
}

fn default_swap_column() -> String {
    "private_id".to_string()
}

fn default_replacement_column() -> String {
    "release_id".to_string()
}

impl Default for IdentifierMappingConfig {
    fn default() -> Self {
        Self {
            table: default_mapping_table(),
            swap_column: default_swap_column(),
            replacement_column: default_replacement_column(),
        }
    }
}
