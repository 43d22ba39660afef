//! Configuration management for the blue carbon ledger

use crate::error::LedgerError;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Environment flag that forces the SQLite backend when set to `true`.
pub const USE_DATABASE_ENV: &str = "USE_DATABASE";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_db_path")]
    pub path: String,
    #[serde(default)]
    pub fallback_to_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: default_db_path(),
            fallback_to_memory: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_validator")]
    pub default_validator: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_validator: default_validator(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_db_path() -> String {
    "./data/ledger.db".to_string()
}

fn default_validator() -> String {
    "system".to_string()
}

fn default_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Parse a TOML document and apply validation. No environment overrides.
    pub fn from_toml(config_str: &str) -> Result<Self, LedgerError> {
        let config: Config = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `USE_DATABASE` from the given value (as read from the environment).
    pub fn apply_database_flag(&mut self, flag: Option<&str>) {
        if matches!(flag, Some(v) if v.trim().eq_ignore_ascii_case("true")) {
            self.storage.backend = StorageBackend::Sqlite;
        }
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.storage.backend == StorageBackend::Sqlite && self.storage.path.trim().is_empty() {
            return Err(LedgerError::ConfigError(
                "storage.path must be set when storage.backend = \"sqlite\"".to_string(),
            ));
        }
        if self.ledger.default_validator.trim().is_empty() {
            return Err(LedgerError::ConfigError(
                "ledger.default_validator must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration from `path`, falling back to defaults when the file is absent.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, LedgerError> {
    let path = path.as_ref();
    let mut config = if path.exists() {
        let config_str = fs::read_to_string(path)?;
        toml::from_str(&config_str)?
    } else {
        Config::default()
    };

    config.apply_database_flag(std::env::var(USE_DATABASE_ENV).ok().as_deref());
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.path, "./data/ledger.db");
        assert!(!config.storage.fallback_to_memory);
        assert_eq!(config.ledger.default_validator, "system");
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_parse_sqlite_backend() {
        let config = Config::from_toml(
            r#"
            [storage]
            backend = "sqlite"
            path = "/var/lib/bluecarbon/ledger.db"
            fallback_to_memory = true

            [ledger]
            default_validator = "registry-validator"
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.storage.path, "/var/lib/bluecarbon/ledger.db");
        assert!(config.storage.fallback_to_memory);
        assert_eq!(config.ledger.default_validator, "registry-validator");
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let err = Config::from_toml("[storage]\nbackend = \"postgres\"\n").unwrap_err();
        assert!(matches!(err, LedgerError::ConfigError(_)));
    }

    #[test]
    fn test_rejects_empty_sqlite_path() {
        let err = Config::from_toml("[storage]\nbackend = \"sqlite\"\npath = \"\"\n").unwrap_err();
        assert!(err.to_string().contains("storage.path"));
    }

    #[test]
    fn test_database_flag() {
        let mut config = Config::default();
        config.apply_database_flag(Some("false"));
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        config.apply_database_flag(None);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        config.apply_database_flag(Some("TRUE"));
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
    }
}
