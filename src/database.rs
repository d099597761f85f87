//! # Structured Object Store
//!
//! This module provides the asynchronous, indexed document store used for
//! everything that does not fit the key-value store: file records, role
//! resources, migrated metadata and the chunked block store's records.
//!
//! ## Core Features
//!
//! - **Versioned Schema**: opening is idempotent; a higher version adds
//!   missing collections and indexes without dropping data, a lower version
//!   is refused
//! - **Key Paths**: each collection extracts its primary key from a field of
//!   the stored document
//! - **Secondary Indexes**: exact-match lookups on indexed fields
//! - **Typed Helpers**: file, role-resource and metadata records validated
//!   at this boundary
//!
//! ## Database Schema
//!
//! ```text
//! files          key id      indexes id, type, roleId, timestamp
//! roleResources  key roleId  indexes roleId, timestamp
//! metadata       key key     indexes key, category
//! fileMetadata   key id      indexes roleId, resourceId, fileType
//! fileChunks     key id      indexes fileId, chunkIndex
//! ```
//!
//! ## Backends
//!
//! The engine sits behind [`ObjectBackend`]. [`MemoryObjectStore`] implements
//! it in process with the same observable semantics as the browser store; the
//! embedding application supplies the IndexedDB implementation.

use async_trait::async_trait;
use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::constants::{
    DATABASE_NAME, FILES_COLLECTION, FILE_CHUNKS_COLLECTION, FILE_METADATA_COLLECTION,
    METADATA_COLLECTION, ROLE_RESOURCES_COLLECTION, SCHEMA_VERSION,
};
use crate::errors::{BackendError, IntegrityIssue, StorageError, StorageResult};
use crate::logging::Logger;
use crate::log_data;
use crate::models::{
    CategoryResources, FileKind, FileRecord, MetadataRecord, NewFile, RoleResourceRecord,
};
use crate::utils::{generate_record_id, now_millis};
use crate::validation::RecordValidator;

/// A secondary index over one field of a collection's documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    pub key_path: String,
}

impl IndexSchema {
    /// An index named after the field it covers.
    pub fn on(field: &str) -> Self {
        Self {
            name: field.to_string(),
            key_path: field.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    pub name: String,
    pub key_path: String,
    pub indexes: Vec<IndexSchema>,
}

impl CollectionSchema {
    pub fn new(name: &str, key_path: &str, indexed_fields: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            key_path: key_path.to_string(),
            indexes: indexed_fields.iter().map(|field| IndexSchema::on(field)).collect(),
        }
    }
}

/// Versioned layout of the structured store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub name: String,
    pub version: u32,
    pub collections: Vec<CollectionSchema>,
}

impl Schema {
    /// The admin console layout at the current schema version.
    pub fn admin_console() -> Self {
        Self {
            name: DATABASE_NAME.to_string(),
            version: SCHEMA_VERSION,
            collections: vec![
                CollectionSchema::new(FILES_COLLECTION, "id", &["id", "type", "roleId", "timestamp"]),
                CollectionSchema::new(ROLE_RESOURCES_COLLECTION, "roleId", &["roleId", "timestamp"]),
                CollectionSchema::new(METADATA_COLLECTION, "key", &["key", "category"]),
                CollectionSchema::new(
                    FILE_METADATA_COLLECTION,
                    "id",
                    &["roleId", "resourceId", "fileType"],
                ),
                CollectionSchema::new(FILE_CHUNKS_COLLECTION, "id", &["fileId", "chunkIndex"]),
            ],
        }
    }
}

/// Raw asynchronous document engine.
///
/// Documents are JSON objects; the primary key is the string found at the
/// collection's key path.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Opens the store at `schema.version`, upgrading it if needed.
    async fn open(&self, schema: &Schema) -> Result<(), BackendError>;

    /// Inserts or replaces a document, returning its primary key.
    async fn put(&self, collection: &str, record: Value) -> Result<String, BackendError>;

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, BackendError>;

    async fn get_all(&self, collection: &str) -> Result<Vec<Value>, BackendError>;

    /// Documents whose indexed field equals `value`.
    async fn get_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &Value,
    ) -> Result<Vec<Value>, BackendError>;

    /// Removes a document; removing a missing key is not an error.
    async fn delete(&self, collection: &str, key: &str) -> Result<(), BackendError>;

    async fn clear(&self, collection: &str) -> Result<(), BackendError>;

    async fn count(&self, collection: &str) -> Result<usize, BackendError>;
}

#[derive(Debug, Default)]
struct MemoryCollection {
    key_path: String,
    /// index name -> indexed field
    indexes: BTreeMap<String, String>,
    records: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
struct MemoryState {
    version: u32,
    collections: BTreeMap<String, MemoryCollection>,
}

/// In-process structured store with versioned schema semantics.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    state: RwLock<MemoryState>,
    unavailable: Option<String>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that refuses to open, as in a private browsing window.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            unavailable: Some(reason.into()),
        }
    }

    /// Schema version currently applied; 0 before the first open.
    pub fn version(&self) -> u32 {
        self.state.read().map(|state| state.version).unwrap_or(0)
    }

    /// Names of the indexes defined on a collection.
    pub fn index_names(&self, collection: &str) -> Vec<String> {
        self.state
            .read()
            .ok()
            .and_then(|state| {
                state
                    .collections
                    .get(collection)
                    .map(|c| c.indexes.keys().cloned().collect())
            })
            .unwrap_or_default()
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryState>, BackendError> {
        if let Some(reason) = &self.unavailable {
            return Err(BackendError::Unavailable(reason.clone()));
        }
        self.state
            .read()
            .map_err(|_| BackendError::Failure("object store lock poisoned".to_string()))
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryState>, BackendError> {
        if let Some(reason) = &self.unavailable {
            return Err(BackendError::Unavailable(reason.clone()));
        }
        self.state
            .write()
            .map_err(|_| BackendError::Failure("object store lock poisoned".to_string()))
    }
}

fn unknown(collection: &str) -> BackendError {
    BackendError::UnknownCollection(collection.to_string())
}

#[async_trait]
impl ObjectBackend for MemoryObjectStore {
    async fn open(&self, schema: &Schema) -> Result<(), BackendError> {
        let mut state = self.write_state()?;
        if schema.version < state.version {
            return Err(BackendError::VersionDowngrade {
                requested: schema.version,
                current: state.version,
            });
        }
        if schema.version == state.version {
            return Ok(());
        }

        for collection in &schema.collections {
            let entry = state
                .collections
                .entry(collection.name.clone())
                .or_insert_with(|| MemoryCollection {
                    key_path: collection.key_path.clone(),
                    ..MemoryCollection::default()
                });
            for index in &collection.indexes {
                entry
                    .indexes
                    .entry(index.name.clone())
                    .or_insert_with(|| index.key_path.clone());
            }
        }
        state.version = schema.version;
        Ok(())
    }

    async fn put(&self, collection: &str, record: Value) -> Result<String, BackendError> {
        let mut state = self.write_state()?;
        let target = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| unknown(collection))?;
        let key = record
            .get(&target.key_path)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| BackendError::MissingKey {
                key_path: target.key_path.clone(),
            })?;
        target.records.insert(key.clone(), record);
        Ok(key)
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, BackendError> {
        let state = self.read_state()?;
        let target = state.collections.get(collection).ok_or_else(|| unknown(collection))?;
        Ok(target.records.get(key).cloned())
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Value>, BackendError> {
        let state = self.read_state()?;
        let target = state.collections.get(collection).ok_or_else(|| unknown(collection))?;
        Ok(target.records.values().cloned().collect())
    }

    async fn get_all_by_index(
        &self,
        collection: &str,
        index: &str,
        value: &Value,
    ) -> Result<Vec<Value>, BackendError> {
        let state = self.read_state()?;
        let target = state.collections.get(collection).ok_or_else(|| unknown(collection))?;
        let field = target
            .indexes
            .get(index)
            .ok_or_else(|| BackendError::UnknownIndex {
                collection: collection.to_string(),
                index: index.to_string(),
            })?;
        Ok(target
            .records
            .values()
            .filter(|record| record.get(field) == Some(value))
            .cloned()
            .collect())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), BackendError> {
        let mut state = self.write_state()?;
        let target = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| unknown(collection))?;
        target.records.remove(key);
        Ok(())
    }

    async fn clear(&self, collection: &str) -> Result<(), BackendError> {
        let mut state = self.write_state()?;
        let target = state
            .collections
            .get_mut(collection)
            .ok_or_else(|| unknown(collection))?;
        target.records.clear();
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize, BackendError> {
        let state = self.read_state()?;
        let target = state.collections.get(collection).ok_or_else(|| unknown(collection))?;
        Ok(target.records.len())
    }
}

/// Record counts and file volume per collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredStats {
    pub files: usize,
    pub total_file_bytes: u64,
    pub files_by_type: BTreeMap<String, usize>,
    pub role_resources: usize,
    pub metadata: usize,
    pub file_metadata: usize,
    pub file_chunks: usize,
}

/// Typed wrapper over an [`ObjectBackend`].
///
/// Raw documents are deserialized and validated here; everything above this
/// layer works with typed records.
#[derive(Clone)]
pub struct StructuredStore {
    backend: Arc<dyn ObjectBackend>,
    schema: Arc<Schema>,
    logger: Logger,
}

impl StructuredStore {
    /// Creates a store over `backend` using the admin console schema.
    pub fn new(backend: Arc<dyn ObjectBackend>) -> Self {
        Self::with_schema(backend, Schema::admin_console())
    }

    pub fn with_schema(backend: Arc<dyn ObjectBackend>, schema: Schema) -> Self {
        Self {
            backend,
            schema: Arc::new(schema),
            logger: Logger::new("structured"),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Opens (and if needed upgrades) the store.
    ///
    /// # Errors
    ///
    /// Every open failure, including a schema downgrade, is reported as
    /// `StorageError::Unavailable`.
    pub async fn open(&self) -> StorageResult<()> {
        match self.backend.open(&self.schema).await {
            Ok(()) => {
                self.logger.debug(
                    "Structured store opened",
                    log_data!("name" => self.schema.name, "version" => self.schema.version),
                );
                Ok(())
            }
            Err(e) => {
                self.logger.warn(
                    "Structured store failed to open",
                    log_data!("error" => e.to_string()),
                );
                Err(StorageError::Unavailable(e.to_string()))
            }
        }
    }

    /// Inserts or replaces a record, returning its primary key.
    pub async fn put<T: Serialize + ?Sized>(&self, collection: &str, record: &T) -> StorageResult<String> {
        let value = serde_json::to_value(record)?;
        Ok(self.backend.put(collection, value).await?)
    }

    pub async fn get_raw(&self, collection: &str, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.backend.get(collection, key).await?)
    }

    /// Reads one record; a document that does not decode is an integrity error.
    pub async fn get_by_key<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> StorageResult<Option<T>> {
        match self.get_raw(collection, key).await? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                StorageError::Integrity(IntegrityIssue::new(collection, key, e.to_string()))
            }),
        }
    }

    pub async fn get_all_raw(&self, collection: &str) -> StorageResult<Vec<Value>> {
        Ok(self.backend.get_all(collection).await?)
    }

    /// Every record of a collection that decodes as `T`.
    ///
    /// Malformed documents are skipped and logged; the integrity job reports
    /// them in full.
    pub async fn get_all<T: DeserializeOwned>(&self, collection: &str) -> StorageResult<Vec<T>> {
        let values = self.get_all_raw(collection).await?;
        Ok(self.decode_all(collection, values))
    }

    pub async fn get_all_by_index<T: DeserializeOwned>(
        &self,
        collection: &str,
        index: &str,
        value: impl Into<Value>,
    ) -> StorageResult<Vec<T>> {
        let values = self
            .backend
            .get_all_by_index(collection, index, &value.into())
            .await?;
        Ok(self.decode_all(collection, values))
    }

    fn decode_all<T: DeserializeOwned>(&self, collection: &str, values: Vec<Value>) -> Vec<T> {
        values
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(e) => {
                    self.logger.warn(
                        "Skipping malformed record",
                        log_data!("collection" => collection, "error" => e.to_string()),
                    );
                    None
                }
            })
            .collect()
    }

    pub async fn delete_by_key(&self, collection: &str, key: &str) -> StorageResult<()> {
        Ok(self.backend.delete(collection, key).await?)
    }

    pub async fn clear(&self, collection: &str) -> StorageResult<()> {
        Ok(self.backend.clear(collection).await?)
    }

    pub async fn count_of(&self, collection: &str) -> StorageResult<usize> {
        Ok(self.backend.count(collection).await?)
    }

    /// Stores a new file under a freshly generated id.
    ///
    /// # Returns
    ///
    /// The generated id (`file_{millis}_{random}`).
    ///
    /// # Errors
    ///
    /// - `Integrity`: the payload is empty or a string without a data-URL prefix
    /// - `Backend` / `Unavailable`: the write failed
    pub async fn store_file(&self, file: NewFile) -> StorageResult<String> {
        let record = file.into_record(generate_record_id("file"), now_millis());
        self.put_file_record(&record).await?;
        Ok(record.id)
    }

    /// Writes a file record under its existing id (migration, router).
    pub async fn put_file_record(&self, record: &FileRecord) -> StorageResult<()> {
        RecordValidator::validate_file_record(record).map_err(StorageError::Integrity)?;
        self.put(FILES_COLLECTION, record).await?;
        Ok(())
    }

    /// Reads and validates a file record.
    pub async fn get_file(&self, id: &str) -> StorageResult<Option<FileRecord>> {
        match self.get_raw(FILES_COLLECTION, id).await? {
            None => Ok(None),
            Some(value) => RecordValidator::validate_file_value(&value)
                .map(Some)
                .map_err(StorageError::Integrity),
        }
    }

    pub async fn delete_file(&self, id: &str) -> StorageResult<()> {
        self.delete_by_key(FILES_COLLECTION, id).await
    }

    /// Files owned by a role, optionally restricted to one kind.
    pub async fn role_files(&self, role_id: &str, kind: Option<FileKind>) -> StorageResult<Vec<FileRecord>> {
        let files: Vec<FileRecord> = self
            .get_all_by_index(FILES_COLLECTION, "roleId", role_id)
            .await?;
        Ok(files
            .into_iter()
            .filter(|file| kind.map_or(true, |kind| file.kind == kind))
            .collect())
    }

    /// Replaces a role's whole resource record.
    pub async fn store_role_resources(
        &self,
        role_id: &str,
        resources: CategoryResources,
    ) -> StorageResult<()> {
        RecordValidator::validate_id("roleId", role_id)?;
        self.put_role_resource_record(&RoleResourceRecord::new(role_id, resources))
            .await
    }

    pub async fn put_role_resource_record(&self, record: &RoleResourceRecord) -> StorageResult<()> {
        self.put(ROLE_RESOURCES_COLLECTION, record).await?;
        Ok(())
    }

    pub async fn get_role_resources(&self, role_id: &str) -> StorageResult<Option<RoleResourceRecord>> {
        self.get_by_key(ROLE_RESOURCES_COLLECTION, role_id).await
    }

    pub async fn all_role_resources(&self) -> StorageResult<Vec<RoleResourceRecord>> {
        self.get_all(ROLE_RESOURCES_COLLECTION).await
    }

    pub async fn delete_role_resources(&self, role_id: &str) -> StorageResult<()> {
        self.delete_by_key(ROLE_RESOURCES_COLLECTION, role_id).await
    }

    pub async fn put_metadata(&self, key: &str, category: &str, value: Value) -> StorageResult<()> {
        RecordValidator::validate_id("key", key)?;
        let record = MetadataRecord {
            key: key.to_string(),
            category: category.to_string(),
            value,
            timestamp: now_millis(),
        };
        self.put(METADATA_COLLECTION, &record).await?;
        Ok(())
    }

    pub async fn get_metadata(&self, key: &str) -> StorageResult<Option<MetadataRecord>> {
        self.get_by_key(METADATA_COLLECTION, key).await
    }

    pub async fn delete_metadata(&self, key: &str) -> StorageResult<()> {
        self.delete_by_key(METADATA_COLLECTION, key).await
    }

    /// Record counts per collection and the total size of stored files.
    pub async fn stats(&self) -> StorageResult<StructuredStats> {
        let files: Vec<FileRecord> = self.get_all(FILES_COLLECTION).await?;
        let mut stats = StructuredStats {
            files: files.len(),
            role_resources: self.count_of(ROLE_RESOURCES_COLLECTION).await?,
            metadata: self.count_of(METADATA_COLLECTION).await?,
            file_metadata: self.count_of(FILE_METADATA_COLLECTION).await?,
            file_chunks: self.count_of(FILE_CHUNKS_COLLECTION).await?,
            ..StructuredStats::default()
        };
        for file in &files {
            stats.total_file_bytes += file.byte_size;
            *stats.files_by_type.entry(file.kind.to_string()).or_insert(0) += 1;
        }
        Ok(stats)
    }

    /// Deletes file records older than `max_age`.
    ///
    /// Never scheduled automatically; the settings screen triggers it.
    ///
    /// # Returns
    ///
    /// The number of records removed.
    pub async fn cleanup_expired_files(&self, max_age: Duration) -> StorageResult<usize> {
        let cutoff = now_millis() - max_age.num_milliseconds();
        let mut removed = 0;
        for value in self.get_all_raw(FILES_COLLECTION).await? {
            let timestamp = value.get("timestamp").and_then(Value::as_i64);
            let id = value.get("id").and_then(Value::as_str);
            if let (Some(timestamp), Some(id)) = (timestamp, id) {
                if timestamp < cutoff {
                    self.delete_file(id).await?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            self.logger.info(
                "Expired files removed",
                log_data!("count" => removed, "maxAgeDays" => max_age.num_days()),
            );
        }
        Ok(removed)
    }

    /// Writes, reads back and deletes a probe record.
    pub async fn self_test(&self) -> bool {
        match self.probe_round_trip().await {
            Ok(passed) => passed,
            Err(e) => {
                self.logger.error(
                    "Structured store self test failed",
                    log_data!("error" => e.to_string()),
                );
                false
            }
        }
    }

    async fn probe_round_trip(&self) -> StorageResult<bool> {
        const PROBE: &str = "__self_test__";
        self.put_metadata(PROBE, "selfTest", json!({ "probe": true })).await?;
        let read = self.get_metadata(PROBE).await?;
        self.delete_metadata(PROBE).await?;
        Ok(read.map_or(false, |record| record.value["probe"] == true))
    }
}
