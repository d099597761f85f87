//! # Configuration Management
//!
//! This module provides configuration for the storage engine. Overrides are
//! stored in the key-value store under `admin_storage_config_v1` and loaded
//! at startup with defaults for every setting.
//!
//! ## Configuration Sources
//!
//! 1. **Key-Value Store**: overrides saved from the settings screen
//! 2. **Defaults**: used when no override exists, the stored value does not
//!    parse, or it fails validation
//!
//! ## Configuration Options
//!
//! - `mode`: backend selection, `auto`, `keyValue` or `structured`
//! - `kvTotal`: assumed browser key-value capacity (default 5MB)
//! - `kvCeiling`: key-value budget reserved for the console (default 2MB)
//! - `autoSwitchThreshold`: payload size routed straight to the structured
//!   store (default 1MB)
//! - `kvFreeFloor`: free space `auto` mode requires to prefer the key-value
//!   store (default 512KB)
//! - `chunkSize`: chunk size of the block store (default 1MB)
//! - `maxFileAgeDays`: age used by the optional expiry sweep (default 30)
//!
//! ## Example
//!
//! ```rust
//! use admin_console_storage::config::{StorageConfig, StorageMode};
//! use admin_console_storage::kv::{KvAdapter, MemoryKeyValueStore};
//! use std::sync::Arc;
//!
//! let kv = KvAdapter::new(Arc::new(MemoryKeyValueStore::new()));
//! let config = StorageConfig::load(&kv).unwrap();
//! assert_eq!(config.mode, StorageMode::Auto);
//! ```

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_AUTO_SWITCH_THRESHOLD, DEFAULT_CHUNK_SIZE, DEFAULT_KV_CEILING, DEFAULT_KV_FREE_FLOOR,
    DEFAULT_KV_TOTAL, DEFAULT_MAX_FILE_AGE_DAYS, STORAGE_CONFIG_KEY,
};
use crate::errors::{StorageError, StorageResult};
use crate::kv::KvAdapter;
use crate::logging::Logger;
use crate::log_data;

/// How the router chooses a backend for small writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageMode {
    /// Prefer the key-value store while it has free space
    #[default]
    Auto,
    KeyValue,
    Structured,
}

/// Storage engine configuration.
///
/// Missing fields in a stored override take their default value, so an
/// override only needs the settings it changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    pub mode: StorageMode,

    /// Assumed total capacity of the browser key-value store, in UTF-16
    /// code units. Heuristic; browsers do not report it.
    pub kv_total: usize,

    /// Portion of the key-value store the console allows itself.
    pub kv_ceiling: usize,

    /// Payloads of at least this many bytes always go to the structured store.
    pub auto_switch_threshold: usize,

    /// Free key-value space below which `auto` mode prefers the structured store.
    pub kv_free_floor: usize,

    /// Raw bytes per chunk in the block store.
    pub chunk_size: usize,

    pub max_file_age_days: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::Auto,
            kv_total: DEFAULT_KV_TOTAL,
            kv_ceiling: DEFAULT_KV_CEILING,
            auto_switch_threshold: DEFAULT_AUTO_SWITCH_THRESHOLD,
            kv_free_floor: DEFAULT_KV_FREE_FLOOR,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_file_age_days: DEFAULT_MAX_FILE_AGE_DAYS,
        }
    }
}

impl StorageConfig {
    /// Loads configuration from the key-value store with fallback to defaults.
    ///
    /// # Arguments
    ///
    /// * `kv` - The key-value adapter holding `admin_storage_config_v1`
    ///
    /// # Returns
    ///
    /// The stored configuration, or the defaults when nothing is stored, the
    /// stored JSON is malformed, or it fails [`StorageConfig::validate`].
    ///
    /// # Errors
    ///
    /// Only a failure to read the key-value store is propagated.
    ///
    /// # Configuration Format
    ///
    /// ```json
    /// {
    ///   "mode": "auto",
    ///   "autoSwitchThreshold": 1048576,
    ///   "chunkSize": 1048576
    /// }
    /// ```
    pub fn load(kv: &KvAdapter) -> StorageResult<Self> {
        let logger = Logger::new("config");

        let config = match kv.get_json::<StorageConfig>(STORAGE_CONFIG_KEY) {
            Ok(Some(config)) => config,
            Ok(None) => {
                logger.debug("No stored configuration, using defaults", None);
                return Ok(Self::default());
            }
            Err(StorageError::Integrity(issue)) => {
                logger.warn(
                    "Stored configuration is malformed, using defaults",
                    log_data!("reason" => issue.reason),
                );
                return Ok(Self::default());
            }
            Err(e) => return Err(e),
        };

        match config.validate() {
            Ok(()) => {
                logger.info(
                    "Configuration loaded from key-value store",
                    log_data!("mode" => config.mode),
                );
                Ok(config)
            }
            Err(e) => {
                logger.warn(
                    "Stored configuration is invalid, using defaults",
                    log_data!("error" => e.to_string()),
                );
                Ok(Self::default())
            }
        }
    }

    /// Persists the configuration after validating it.
    pub fn save(&self, kv: &KvAdapter) -> StorageResult<()> {
        self.validate()?;
        kv.set_json(STORAGE_CONFIG_KEY, self)
    }

    /// Checks that the numeric policy is coherent.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when a size is zero, the console ceiling exceeds the
    /// assumed total, the free-space floor is not below the ceiling, or the
    /// maximum age is negative.
    pub fn validate(&self) -> StorageResult<()> {
        let invalid = |reason: &str| Err(StorageError::InvalidInput(reason.to_string()));

        if self.chunk_size == 0 {
            return invalid("chunkSize must be greater than zero");
        }
        if self.auto_switch_threshold == 0 {
            return invalid("autoSwitchThreshold must be greater than zero");
        }
        if self.kv_ceiling == 0 || self.kv_ceiling > self.kv_total {
            return invalid("kvCeiling must be between 1 and kvTotal");
        }
        if self.kv_free_floor >= self.kv_ceiling {
            return invalid("kvFreeFloor must be below kvCeiling");
        }
        if self.max_file_age_days < 0 {
            return invalid("maxFileAgeDays must not be negative");
        }
        Ok(())
    }

    pub fn max_file_age(&self) -> Duration {
        Duration::days(self.max_file_age_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKeyValueStore;
    use std::sync::Arc;

    fn adapter() -> KvAdapter {
        KvAdapter::new(Arc::new(MemoryKeyValueStore::new()))
    }

    #[test]
    fn defaults_are_valid() {
        let config = StorageConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.auto_switch_threshold, 1024 * 1024);
        assert_eq!(config.max_file_age().num_days(), 30);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let kv = adapter();
        kv.set(STORAGE_CONFIG_KEY, r#"{"mode":"structured","chunkSize":2048}"#)
            .unwrap();
        let config = StorageConfig::load(&kv).unwrap();
        assert_eq!(config.mode, StorageMode::Structured);
        assert_eq!(config.chunk_size, 2048);
        assert_eq!(config.kv_ceiling, DEFAULT_KV_CEILING);
    }

    #[test]
    fn malformed_override_falls_back_to_defaults() {
        let kv = adapter();
        kv.set(STORAGE_CONFIG_KEY, "{oops").unwrap();
        assert_eq!(StorageConfig::load(&kv).unwrap(), StorageConfig::default());
    }

    #[test]
    fn invalid_override_falls_back_to_defaults() {
        let kv = adapter();
        kv.set(STORAGE_CONFIG_KEY, r#"{"chunkSize":0}"#).unwrap();
        assert_eq!(StorageConfig::load(&kv).unwrap(), StorageConfig::default());
    }

    #[test]
    fn save_round_trips_through_load() {
        let kv = adapter();
        let config = StorageConfig {
            mode: StorageMode::KeyValue,
            ..StorageConfig::default()
        };
        config.save(&kv).unwrap();
        assert_eq!(StorageConfig::load(&kv).unwrap(), config);
    }

    #[test]
    fn floor_must_be_below_ceiling() {
        let config = StorageConfig {
            kv_free_floor: DEFAULT_KV_CEILING,
            ..StorageConfig::default()
        };
        assert!(matches!(config.validate(), Err(StorageError::InvalidInput(_))));
    }
}
