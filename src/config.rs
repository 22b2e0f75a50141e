//! Configuration loading helpers.

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::checkpoint::LogCheckpointBackend;
use crate::utility::is_power_of_two;

/// Errors returned by configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error while reading config files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parse error.
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// Invalid value for a key.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Raw value string.
        value: String,
    },
    /// Unknown configuration key.
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Resolved store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Hash table size in buckets (power of two).
    pub table_size: u64,
    /// log2 of the page size in bytes.
    pub page_size_bits: u32,
    /// Number of page frames in the in-memory ring. Fixed at construction;
    /// recovery never grows it.
    pub memory_pages: u32,
    /// How many pages behind the tail the head sits after recovery.
    pub head_offset_lag_pages: u32,
    /// Segment size for disk storage.
    pub segment_size: u64,
    /// Log checkpoint backend (snapshot file vs fold-over).
    pub checkpoint_backend: LogCheckpointBackend,
}

impl StoreConfig {
    /// Page size in bytes.
    #[inline]
    pub fn page_size(&self) -> usize {
        1usize << self.page_size_bits
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_power_of_two(self.table_size) {
            return Err(ConfigError::InvalidValue {
                key: "store.table_size".into(),
                value: self.table_size.to_string(),
            });
        }
        if self.page_size_bits < 6 || self.page_size_bits > 30 {
            return Err(ConfigError::InvalidValue {
                key: "store.page_size_bits".into(),
                value: self.page_size_bits.to_string(),
            });
        }
        if self.memory_pages == 0 {
            return Err(ConfigError::InvalidValue {
                key: "store.memory_pages".into(),
                value: self.memory_pages.to_string(),
            });
        }
        if self.head_offset_lag_pages == 0 || self.head_offset_lag_pages > self.memory_pages {
            return Err(ConfigError::InvalidValue {
                key: "store.head_offset_lag_pages".into(),
                value: self.head_offset_lag_pages.to_string(),
            });
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table_size: 1 << 16,
            page_size_bits: 25,
            memory_pages: 64,
            head_offset_lag_pages: 16,
            segment_size: 1 << 30,
            checkpoint_backend: LogCheckpointBackend::Snapshot,
        }
    }
}

/// Top-level configuration schema.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CinderConfig {
    /// Store configuration.
    pub store: Option<StoreSpec>,
}

/// Store configuration section, all fields optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreSpec {
    /// Hash table size in buckets.
    pub table_size: Option<u64>,
    /// log2 of the page size in bytes.
    pub page_size_bits: Option<u32>,
    /// Ring capacity in pages.
    pub memory_pages: Option<u32>,
    /// Head lag behind the tail, in pages.
    pub head_offset_lag_pages: Option<u32>,
    /// Segment size for disk storage.
    pub segment_size: Option<u64>,
    /// Log checkpoint backend: `"snapshot"` or `"fold-over"`.
    pub checkpoint_backend: Option<String>,
}

impl StoreSpec {
    fn apply_to(&self, config: &mut StoreConfig) -> Result<(), ConfigError> {
        if let Some(v) = self.table_size {
            config.table_size = v;
        }
        if let Some(v) = self.page_size_bits {
            config.page_size_bits = v;
        }
        if let Some(v) = self.memory_pages {
            config.memory_pages = v;
        }
        if let Some(v) = self.head_offset_lag_pages {
            config.head_offset_lag_pages = v;
        }
        if let Some(v) = self.segment_size {
            config.segment_size = v;
        }
        if let Some(v) = &self.checkpoint_backend {
            config.checkpoint_backend = parse_backend("store.checkpoint_backend", v)?;
        }
        Ok(())
    }
}

impl CinderConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load configuration from the `CINDERKV_CONFIG` env var (if set), then
    /// apply `CINDERKV__section__field` overrides.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let config_path = env::var("CINDERKV_CONFIG").ok();
        let mut config = match config_path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment overrides in-place.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        for (key, value) in env::vars() {
            if !key.starts_with("CINDERKV__") {
                continue;
            }
            let path = key["CINDERKV__".len()..].to_ascii_lowercase();
            let parts: Vec<&str> = path.split("__").collect();
            let value = value.trim().to_string();

            match parts.as_slice() {
                ["store", "table_size"] => {
                    self.store_mut().table_size = Some(parse_value(&key, &value)?);
                }
                ["store", "page_size_bits"] => {
                    self.store_mut().page_size_bits = Some(parse_value(&key, &value)?);
                }
                ["store", "memory_pages"] => {
                    self.store_mut().memory_pages = Some(parse_value(&key, &value)?);
                }
                ["store", "head_offset_lag_pages"] => {
                    self.store_mut().head_offset_lag_pages = Some(parse_value(&key, &value)?);
                }
                ["store", "segment_size"] => {
                    self.store_mut().segment_size = Some(parse_value(&key, &value)?);
                }
                ["store", "checkpoint_backend"] => {
                    self.store_mut().checkpoint_backend = Some(value);
                }
                _ => return Err(ConfigError::UnknownKey(key)),
            }
        }

        Ok(())
    }

    /// Build a `StoreConfig` using defaults plus overrides.
    pub fn to_store_config(&self) -> Result<StoreConfig, ConfigError> {
        let mut config = StoreConfig::default();
        if let Some(store) = &self.store {
            store.apply_to(&mut config)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn store_mut(&mut self) -> &mut StoreSpec {
        self.store.get_or_insert_with(StoreSpec::default)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_backend(key: &str, value: &str) -> Result<LogCheckpointBackend, ConfigError> {
    match value {
        "snapshot" => Ok(LogCheckpointBackend::Snapshot),
        "fold-over" | "foldover" => Ok(LogCheckpointBackend::FoldOver),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        StoreConfig::default().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_table_size() {
        let config = StoreConfig {
            table_size: 1000,
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_lag_beyond_capacity() {
        let config = StoreConfig {
            memory_pages: 4,
            head_offset_lag_pages: 8,
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_parsing() {
        let toml = r#"
            [store]
            table_size = 2048
            page_size_bits = 10
            memory_pages = 4
            head_offset_lag_pages = 2
            checkpoint_backend = "fold-over"
        "#;
        let config: CinderConfig = toml::from_str(toml).unwrap();
        let store = config.to_store_config().unwrap();

        assert_eq!(store.table_size, 2048);
        assert_eq!(store.page_size(), 1024);
        assert_eq!(store.memory_pages, 4);
        assert_eq!(store.checkpoint_backend, LogCheckpointBackend::FoldOver);
    }

    #[test]
    fn test_backend_parse_rejects_unknown() {
        assert!(parse_backend("store.checkpoint_backend", "delta").is_err());
    }
}
