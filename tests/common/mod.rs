//! Shared fixtures for the scenario tests.

#![allow(dead_code)]

use admin_console_storage::config::StorageConfig;
use admin_console_storage::database::{MemoryObjectStore, ObjectBackend, Schema};
use admin_console_storage::errors::BackendError;
use admin_console_storage::kv::{KeyValueBackend, MemoryKeyValueStore};
use admin_console_storage::StorageContext;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Structured engine that fails selected writes.
#[derive(Default)]
pub struct FaultyObjectStore {
    inner: MemoryObjectStore,
    fail_chunk_index: Mutex<Option<u64>>,
    fail_role_id: Mutex<Option<String>>,
}

impl FaultyObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the write of the chunk with this zero-based index.
    pub fn fail_chunk(&self, index: u64) {
        *self.fail_chunk_index.lock().unwrap() = Some(index);
    }

    /// Fails role resource writes for this role id.
    pub fn fail_role(&self, role_id: &str) {
        *self.fail_role_id.lock().unwrap() = Some(role_id.to_string());
    }

    pub fn heal(&self) {
        *self.fail_chunk_index.lock().unwrap() = None;
        *self.fail_role_id.lock().unwrap() = None;
    }

    fn should_fail(&self, collection: &str, record: &Value) -> bool {
        match collection {
            "fileChunks" => {
                let index = record.get("chunkIndex").and_then(Value::as_u64);
                index.is_some() && index == *self.fail_chunk_index.lock().unwrap()
            }
            "roleResources" => {
                let role = record.get("roleId").and_then(Value::as_str);
                role.is_some() && role == self.fail_role_id.lock().unwrap().as_deref()
            }
            _ => false,
        }
    }
}

#[async_trait]
impl ObjectBackend for FaultyObjectStore {
    async fn open(&self, schema: &Schema) -> Result<(), BackendError> {
        self.inner.open(schema).await
    }

    async fn put(&self, collection: &str, record: Value) -> Result<String, BackendError> {
        if self.should_fail(collection, &record) {
            return Err(BackendError::Failure("injected write failure".to_string()));
        }
        self.inner.put(collection, record).await
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, BackendError> {
        self.inner.get(collection, key).await
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Value>, BackendError> {
        self.inner.get_all(collection).await
    }

    async fn get_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &Value,
    ) -> Result<Vec<Value>, BackendError> {
        self.inner.get_all_by_index(collection, index, value).await
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), BackendError> {
        self.inner.delete(collection, key).await
    }

    async fn clear(&self, collection: &str) -> Result<(), BackendError> {
        self.inner.clear(collection).await
    }

    async fn count(&self, collection: &str) -> Result<usize, BackendError> {
        self.inner.count(collection).await
    }
}

/// Context over a fault-injecting structured engine.
pub fn faulty_context(config: StorageConfig) -> (StorageContext, Arc<FaultyObjectStore>) {
    let faulty = Arc::new(FaultyObjectStore::new());
    let kv: Arc<dyn KeyValueBackend> = Arc::new(MemoryKeyValueStore::new());
    let context = StorageContext::with_config(config, kv, faulty.clone());
    (context, faulty)
}

/// Context whose key-value store holds `capacity` UTF-16 units.
pub fn context_with_kv_capacity(config: StorageConfig, capacity: usize) -> StorageContext {
    StorageContext::with_config(
        config,
        Arc::new(MemoryKeyValueStore::with_capacity(capacity)),
        Arc::new(MemoryObjectStore::new()),
    )
}

/// Deterministic bytes that start with the PNG signature.
pub fn png_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend((0..len.saturating_sub(8)).map(|i| (i % 251) as u8));
    bytes
}
