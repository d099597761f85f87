//! # Key-Value Store Adapter
//!
//! Thin wrapper over the synchronous, size-limited, string-only key-value
//! store (`localStorage` in the browser). The adapter never interprets
//! values; callers serialize to JSON themselves or use the typed helpers.
//!
//! ## Error Translation
//!
//! A backend quota failure is rethrown as [`StorageError::Quota`] carrying the
//! key and the attempted size, so the router can react (flip backend, retry)
//! instead of seeing a generic failure.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::constants::DEFAULT_KV_TOTAL;
use crate::errors::{BackendError, IntegrityIssue, StorageError, StorageResult};
use crate::logging::Logger;
use crate::log_data;
use crate::utils::utf16_len;

/// Raw synchronous key-value engine.
pub trait KeyValueBackend: Send + Sync {
    /// Every key currently stored.
    fn keys(&self) -> Result<Vec<String>, BackendError>;

    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError>;

    /// Stores a value, failing with [`BackendError::QuotaExceeded`] when the
    /// store would grow past its capacity.
    fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError>;

    /// Removes a key; removing a missing key is not an error.
    fn remove_item(&self, key: &str) -> Result<(), BackendError>;
}

/// In-process key-value engine with browser-like quota accounting.
///
/// Capacity is measured in UTF-16 code units over keys and values, the same
/// way the quota estimator measures usage.
#[derive(Debug)]
pub struct MemoryKeyValueStore {
    entries: RwLock<BTreeMap<String, String>>,
    capacity: usize,
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_KV_TOTAL)
    }
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Code units currently in use.
    pub fn usage(&self) -> usize {
        self.entries
            .read()
            .map(|entries| entries.iter().map(|(k, v)| utf16_len(k) + utf16_len(v)).sum())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> BackendError {
    BackendError::Failure("key-value store lock poisoned".to_string())
}

impl KeyValueBackend for MemoryKeyValueStore {
    fn keys(&self) -> Result<Vec<String>, BackendError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.keys().cloned().collect())
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let used: usize = entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| utf16_len(k) + utf16_len(v))
            .sum();
        if used + utf16_len(key) + utf16_len(value) > self.capacity {
            return Err(BackendError::QuotaExceeded);
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), BackendError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }
}

/// Typed-error adapter over a [`KeyValueBackend`].
#[derive(Clone)]
pub struct KvAdapter {
    backend: Arc<dyn KeyValueBackend>,
    logger: Logger,
}

impl KvAdapter {
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self {
            backend,
            logger: Logger::new("kv"),
        }
    }

    pub fn backend(&self) -> &Arc<dyn KeyValueBackend> {
        &self.backend
    }

    pub fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.backend.keys()?)
    }

    pub fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.backend.get_item(key)?)
    }

    /// Stores a string value.
    ///
    /// # Errors
    ///
    /// - `Quota`: the backend refused the write for lack of space
    /// - `Backend`: any other backend failure
    pub fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        match self.backend.set_item(key, value) {
            Ok(()) => Ok(()),
            Err(BackendError::QuotaExceeded) => {
                let attempted = utf16_len(key) + utf16_len(value);
                self.logger.warn(
                    "Key-value quota exceeded",
                    log_data!("key" => key, "attempted" => attempted),
                );
                Err(StorageError::Quota {
                    key: key.to_string(),
                    attempted,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete(&self, key: &str) -> StorageResult<()> {
        Ok(self.backend.remove_item(key)?)
    }

    /// Size of an entry (key plus value) in UTF-16 code units; 0 when absent.
    pub fn size_of(&self, key: &str) -> StorageResult<usize> {
        Ok(self
            .get(key)?
            .map(|value| utf16_len(key) + utf16_len(&value))
            .unwrap_or(0))
    }

    /// Reads and parses a JSON value.
    ///
    /// A value that is present but does not parse as `T` is reported as an
    /// integrity error rather than silently treated as absent.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.get(key)? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|e| {
                StorageError::Integrity(IntegrityIssue::new("keyValue", key, e.to_string()))
            }),
        }
    }

    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_enforces_capacity() {
        let store = MemoryKeyValueStore::with_capacity(10);
        assert!(store.set_item("ab", "cdef").is_ok());
        assert_eq!(store.usage(), 6);
        assert_eq!(store.set_item("x", "12345"), Err(BackendError::QuotaExceeded));
        // Replacing an existing value only counts the new value.
        assert!(store.set_item("ab", "cdefghij").is_ok());
        assert_eq!(store.usage(), 10);
    }

    #[test]
    fn adapter_types_quota_failures() {
        let adapter = KvAdapter::new(Arc::new(MemoryKeyValueStore::with_capacity(4)));
        let err = adapter.set("key", "value").unwrap_err();
        assert!(matches!(err, StorageError::Quota { ref key, attempted: 8 } if key == "key"));
    }

    #[test]
    fn size_of_counts_key_and_value() {
        let adapter = KvAdapter::new(Arc::new(MemoryKeyValueStore::new()));
        adapter.set("k", "角色").unwrap();
        assert_eq!(adapter.size_of("k").unwrap(), 3);
        assert_eq!(adapter.size_of("missing").unwrap(), 0);
    }

    #[test]
    fn unparsable_json_is_an_integrity_error() {
        let adapter = KvAdapter::new(Arc::new(MemoryKeyValueStore::new()));
        adapter.set("admin_users_v1", "{not json").unwrap();
        let err = adapter.get_json::<Vec<String>>("admin_users_v1").unwrap_err();
        assert!(matches!(err, StorageError::Integrity(ref issue) if issue.record_id == "admin_users_v1"));
    }

    #[test]
    fn delete_missing_key_is_ok() {
        let adapter = KvAdapter::new(Arc::new(MemoryKeyValueStore::new()));
        assert!(adapter.delete("nothing").is_ok());
        assert_eq!(adapter.get("nothing").unwrap(), None);
    }
}
