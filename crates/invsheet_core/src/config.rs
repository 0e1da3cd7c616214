//! Runtime configuration from the environment.
//!
//! # Responsibility
//! - Resolve store path, log settings and write mode into one value.
//!
//! # Invariants
//! - Values are validated here, so downstream code never re-checks them.
//! - Unset or blank variables fall back to defaults; set but invalid ones
//!   are errors.

use crate::logging::{default_log_level, normalize_level, normalize_log_dir, LoggingError};
use crate::service::sheet_service::WriteMode;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const ENV_DB_PATH: &str = "INVSHEET_DB_PATH";
pub const ENV_LOG_LEVEL: &str = "INVSHEET_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "INVSHEET_LOG_DIR";
pub const ENV_WRITE_MODE: &str = "INVSHEET_WRITE_MODE";

const DEFAULT_DB_FILE: &str = "invsheet.sqlite3";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: {source}")]
    Logging {
        var: &'static str,
        #[source]
        source: LoggingError,
    },
    #[error("INVSHEET_WRITE_MODE: unsupported write mode `{0}`; expected atomic|per_operation")]
    UnsupportedWriteMode(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    pub db_path: PathBuf,
    pub log_level: &'static str,
    pub log_dir: Option<PathBuf>,
    pub write_mode: WriteMode,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            db_path: std::env::temp_dir().join(DEFAULT_DB_FILE),
            log_level: default_log_level(),
            log_dir: None,
            write_mode: WriteMode::default(),
        }
    }
}

impl CoreConfig {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads values through `lookup`, e.g. a map in tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = Self::default();

        if let Some(path) = read(ENV_DB_PATH) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(level) = read(ENV_LOG_LEVEL) {
            config.log_level = normalize_level(&level).map_err(|source| ConfigError::Logging {
                var: ENV_LOG_LEVEL,
                source,
            })?;
        }
        if let Some(dir) = read(ENV_LOG_DIR) {
            let dir = normalize_log_dir(PathBuf::from(dir).as_path()).map_err(|source| {
                ConfigError::Logging {
                    var: ENV_LOG_DIR,
                    source,
                }
            })?;
            config.log_dir = Some(dir);
        }
        if let Some(mode) = read(ENV_WRITE_MODE) {
            config.write_mode = parse_write_mode(&mode)?;
        }

        Ok(config)
    }
}

/// Parses `atomic` / `per_operation` (case-insensitive, `-` accepted for `_`).
pub fn parse_write_mode(raw: &str) -> Result<WriteMode, ConfigError> {
    let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
    WriteMode::from_str(&normalized).map_err(|_| ConfigError::UnsupportedWriteMode(raw.to_string()))
}
