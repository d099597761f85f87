//! # Hybrid Storage Router
//!
//! Routes every write to the key-value store or the structured store and
//! gives callers a single get/set/delete surface over both.
//!
//! ## Routing Strategy
//!
//! - Payloads of at least `autoSwitchThreshold` bytes always go to the
//!   structured store
//! - Smaller payloads go to the session's preferred backend
//! - A key-value quota failure, actual or predicted by the quota estimator,
//!   flips the preferred backend to the structured store for the rest of the
//!   session and the write is retried there
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized → Initializing → Ready { preferred, structured_available }
//! ```
//!
//! Initialization runs under an async mutex: concurrent callers wait for the
//! first one. Every public operation initializes lazily. When the structured
//! store cannot be opened the router runs in degraded key-value-only mode.
//!
//! ## Placement
//!
//! Writes and migrations record which backend holds each file id. Reads
//! consult that table first and fall back to checking the key-value store,
//! then the structured store, for ids written in an earlier session.
//!
//! ## Concurrency
//!
//! No lock is held across a write. Concurrent writes to the same id are
//! last-write-wins, and a read-modify-write of a role's resources is not
//! atomic.

use chrono::Duration;
use futures::lock::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::config::{StorageConfig, StorageMode};
use crate::constants::{FILE_KEY_PREFIX, PROBE_KEY, ROLE_RESOURCES_COLLECTION, ROLE_RESOURCES_KEY, TEMP_KEY_MARKER};
use crate::database::{StructuredStats, StructuredStore};
use crate::errors::{IntegrityIssue, StorageError, StorageResult};
use crate::jobs::migration::{self, MigrationReport};
use crate::kv::KvAdapter;
use crate::logging::Logger;
use crate::log_data;
use crate::models::{CategoryResources, FileRecord, NewFile};
use crate::quota::{EntrySize, QuotaEstimate, QuotaEstimator, QuotaWarning};
use crate::utils::{generate_record_id, now_millis, utf16_len};
use crate::validation::RecordValidator;

/// Structured-store volume above which stats recommend an expiry sweep (100MB).
const STRUCTURED_SWEEP_HINT_BYTES: u64 = 100 * 1024 * 1024;

/// Role id to category resources, the shape stored under
/// `admin_role_resources_v1`.
pub type RoleResourceMap = BTreeMap<String, CategoryResources>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Backend {
    KeyValue,
    Structured,
}

/// Router state once initialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStatus {
    pub preferred: Backend,
    pub structured_available: bool,
    /// Set once a quota failure flipped the session to the structured store
    pub quota_flipped: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub key_value: usize,
    pub structured: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStats {
    pub status: RouterStatus,
    pub key_value: QuotaEstimate,
    pub warning: Option<QuotaWarning>,
    pub largest_entries: Vec<EntrySize>,
    pub structured: Option<StructuredStats>,
    pub recommendations: Vec<String>,
}

/// Key under which a file record lives in the key-value store.
pub fn kv_file_key(id: &str) -> String {
    format!("{}{}", FILE_KEY_PREFIX, id)
}

/// Routes reads and writes across the key-value and structured stores.
pub struct HybridRouter {
    config: StorageConfig,
    kv: KvAdapter,
    structured: StructuredStore,
    estimator: QuotaEstimator,
    state: Mutex<Option<RouterStatus>>,
    placements: RwLock<HashMap<String, Backend>>,
    logger: Logger,
}

impl HybridRouter {
    /// Creates an uninitialized router.
    ///
    /// The quota estimator measures the key-value store against the
    /// console's reserved ceiling (`kvCeiling`), not the browser total.
    pub fn new(config: StorageConfig, kv: KvAdapter, structured: StructuredStore) -> Self {
        let estimator = QuotaEstimator::new(kv.backend().clone(), config.kv_ceiling);
        Self {
            config,
            kv,
            structured,
            estimator,
            state: Mutex::new(None),
            placements: RwLock::new(HashMap::new()),
            logger: Logger::new("router"),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn kv(&self) -> &KvAdapter {
        &self.kv
    }

    pub fn structured(&self) -> &StructuredStore {
        &self.structured
    }

    pub fn estimator(&self) -> &QuotaEstimator {
        &self.estimator
    }

    /// Opens the structured store and picks the preferred backend.
    ///
    /// Idempotent: later calls return the state chosen by the first one.
    /// Never fails; an unavailable structured store puts the router in
    /// degraded key-value-only mode.
    ///
    /// # Backend Selection
    ///
    /// - structured store unavailable → key-value
    /// - `keyValue` / `structured` mode → as configured
    /// - `auto` mode → key-value while its free space exceeds `kvFreeFloor`
    pub async fn init(&self) -> RouterStatus {
        let mut state = self.state.lock().await;
        if let Some(status) = *state {
            return status;
        }

        let structured_available = match self.structured.open().await {
            Ok(()) => true,
            Err(e) => {
                self.logger.warn(
                    "Structured store unavailable, running key-value only",
                    log_data!("error" => e.to_string()),
                );
                false
            }
        };

        let preferred = if !structured_available {
            Backend::KeyValue
        } else {
            match self.config.mode {
                StorageMode::KeyValue => Backend::KeyValue,
                StorageMode::Structured => Backend::Structured,
                StorageMode::Auto => {
                    let estimate = self.estimator.estimate_usage();
                    if estimate.available > self.config.kv_free_floor {
                        Backend::KeyValue
                    } else {
                        Backend::Structured
                    }
                }
            }
        };

        let status = RouterStatus {
            preferred,
            structured_available,
            quota_flipped: false,
        };
        *state = Some(status);

        self.logger.info(
            "Hybrid router initialized",
            log_data!(
                "preferred" => preferred,
                "structuredAvailable" => structured_available,
                "mode" => self.config.mode
            ),
        );
        status
    }

    /// Current state, initializing first if needed.
    pub async fn status(&self) -> RouterStatus {
        self.init().await
    }

    /// Backend recorded for a file id in this session.
    pub fn placement(&self, id: &str) -> Option<Backend> {
        self.placements
            .read()
            .ok()
            .and_then(|placements| placements.get(id).copied())
    }

    pub(crate) fn record_placement(&self, id: &str, backend: Backend) {
        if let Ok(mut placements) = self.placements.write() {
            placements.insert(id.to_string(), backend);
        }
    }

    fn forget_placement(&self, id: &str) {
        if let Ok(mut placements) = self.placements.write() {
            placements.remove(id);
        }
    }

    async fn flip_to_structured(&self, reason: &str) {
        let mut state = self.state.lock().await;
        if let Some(status) = state.as_mut() {
            if status.preferred != Backend::Structured {
                status.preferred = Backend::Structured;
                status.quota_flipped = true;
                self.logger.warn(
                    "Key-value store full, switching to structured store for this session",
                    log_data!("reason" => reason),
                );
            }
        }
    }

    /// Stores a new file and returns its generated id.
    ///
    /// # Arguments
    ///
    /// * `file` - The file to store; binary payloads are converted to a data
    ///   URL when they land in the key-value store
    ///
    /// # Errors
    ///
    /// - `InvalidInput`: the payload is empty
    /// - `Unavailable`: the payload needs the structured store and it could
    ///   not be opened
    /// - `Quota`: the key-value store is full and the structured store is
    ///   unavailable
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let file = NewFile::from_bytes("role-1", "eat", "noodles.png", "image/png", bytes);
    /// let id = router.route_write(file).await?;
    /// ```
    pub async fn route_write(&self, file: NewFile) -> StorageResult<String> {
        let status = self.init().await;
        if file.payload.is_empty() {
            return Err(StorageError::InvalidInput("payload is empty".to_string()));
        }

        let byte_size = file.byte_size();
        let record = file.into_record(generate_record_id("file"), now_millis());
        RecordValidator::validate_file_record(&record)
            .map_err(|issue| StorageError::Encoding(issue.reason))?;

        if byte_size >= self.config.auto_switch_threshold {
            if !status.structured_available {
                return Err(StorageError::Unavailable(format!(
                    "{} bytes exceeds the key-value threshold and the structured store is unavailable",
                    byte_size
                )));
            }
            return self.write_structured(record).await;
        }

        match status.preferred {
            Backend::Structured => self.write_structured(record).await,
            Backend::KeyValue => {
                if status.structured_available && self.estimator.would_exceed(byte_size) {
                    self.flip_to_structured("predicted").await;
                    return self.write_structured(record).await;
                }
                match self.write_kv(&record) {
                    Ok(()) => Ok(record.id),
                    Err(e) if e.is_quota() && status.structured_available => {
                        self.flip_to_structured("quota exceeded").await;
                        self.write_structured(record).await
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn write_kv(&self, record: &FileRecord) -> StorageResult<()> {
        let mut stored = record.clone();
        let mime = stored.effective_mime();
        stored.payload = stored.payload.into_data_url(&mime);
        self.kv.set_json(&kv_file_key(&record.id), &stored)?;
        self.record_placement(&record.id, Backend::KeyValue);
        Ok(())
    }

    async fn write_structured(&self, record: FileRecord) -> StorageResult<String> {
        self.structured.put_file_record(&record).await?;
        self.record_placement(&record.id, Backend::Structured);
        Ok(record.id)
    }

    /// Reads a file from whichever backend holds it.
    ///
    /// A key-value copy that does not parse or validate counts as a miss:
    /// the structured store is still consulted, since a stale or corrupt
    /// `file_{id}` key may shadow an intact structured record.
    ///
    /// # Returns
    ///
    /// `None` when neither backend has the id.
    ///
    /// # Errors
    ///
    /// `Integrity` when no valid copy exists and at least one stored copy is
    /// corrupt.
    pub async fn route_read(&self, id: &str) -> StorageResult<Option<FileRecord>> {
        let status = self.init().await;

        let structured_first =
            status.structured_available && self.placement(id) == Some(Backend::Structured);
        if structured_first {
            if let Some(record) = self.structured.get_file(id).await? {
                return Ok(Some(record));
            }
        }

        let kv_issue = match self.read_kv(id) {
            Ok(Some(record)) => {
                self.record_placement(id, Backend::KeyValue);
                return Ok(Some(record));
            }
            Ok(None) => None,
            Err(StorageError::Integrity(issue)) => {
                self.logger.warn(
                    "Unreadable key-value file record, checking structured store",
                    log_data!("record" => issue.to_string()),
                );
                Some(issue)
            }
            Err(e) => return Err(e),
        };

        if status.structured_available && !structured_first {
            if let Some(record) = self.structured.get_file(id).await? {
                self.record_placement(id, Backend::Structured);
                return Ok(Some(record));
            }
        }

        match kv_issue {
            Some(issue) => Err(StorageError::Integrity(issue)),
            None => Ok(None),
        }
    }

    fn read_kv(&self, id: &str) -> StorageResult<Option<FileRecord>> {
        let key = kv_file_key(id);
        match self.kv.get(&key)? {
            None => Ok(None),
            Some(raw) => {
                let value: Value = serde_json::from_str(&raw).map_err(|e| {
                    StorageError::Integrity(IntegrityIssue::new("keyValue", &key, e.to_string()))
                })?;
                RecordValidator::validate_file_value(&value)
                    .map(Some)
                    .map_err(StorageError::Integrity)
            }
        }
    }

    /// Removes a file from both backends.
    pub async fn delete_file(&self, id: &str) -> StorageResult<()> {
        let status = self.init().await;
        self.kv.delete(&kv_file_key(id))?;
        if status.structured_available {
            self.structured.delete_file(id).await?;
        }
        self.forget_placement(id);
        Ok(())
    }

    /// Replaces a role's resources, routed by serialized size.
    ///
    /// Writing to one backend removes the role's copy from the other so a
    /// later read never sees stale data.
    ///
    /// # Returns
    ///
    /// The backend that now holds the record.
    pub async fn store_role_resources(
        &self,
        role_id: &str,
        resources: CategoryResources,
    ) -> StorageResult<Backend> {
        RecordValidator::validate_id("roleId", role_id)?;
        let status = self.init().await;
        let size = utf16_len(&serde_json::to_string(&resources)?);
        let oversized = size >= self.config.auto_switch_threshold;

        if oversized && !status.structured_available {
            return Err(StorageError::Unavailable(format!(
                "resources for {} exceed the key-value threshold and the structured store is unavailable",
                role_id
            )));
        }

        let to_structured = status.structured_available
            && (oversized || status.preferred == Backend::Structured);
        if to_structured {
            self.write_role_resources_structured(role_id, resources).await?;
            return Ok(Backend::Structured);
        }

        if status.structured_available && self.estimator.would_exceed(size) {
            self.flip_to_structured("predicted").await;
            self.write_role_resources_structured(role_id, resources).await?;
            return Ok(Backend::Structured);
        }

        let mut map = self.kv_role_resources()?;
        map.insert(role_id.to_string(), resources.clone());
        match self.kv.set_json(ROLE_RESOURCES_KEY, &map) {
            Ok(()) => {
                if status.structured_available {
                    if let Err(e) = self.structured.delete_role_resources(role_id).await {
                        self.logger.warn(
                            "Failed to prune structured role resources",
                            log_data!("roleId" => role_id, "error" => e.to_string()),
                        );
                    }
                }
                Ok(Backend::KeyValue)
            }
            Err(e) if e.is_quota() && status.structured_available => {
                self.flip_to_structured("quota exceeded").await;
                self.write_role_resources_structured(role_id, resources).await?;
                Ok(Backend::Structured)
            }
            Err(e) => Err(e),
        }
    }

    async fn write_role_resources_structured(
        &self,
        role_id: &str,
        resources: CategoryResources,
    ) -> StorageResult<()> {
        self.structured.store_role_resources(role_id, resources).await?;
        self.remove_kv_role_resources(role_id)
    }

    /// Role resources stored in the key-value map.
    pub fn kv_role_resources(&self) -> StorageResult<RoleResourceMap> {
        Ok(self.kv.get_json(ROLE_RESOURCES_KEY)?.unwrap_or_default())
    }

    fn remove_kv_role_resources(&self, role_id: &str) -> StorageResult<()> {
        let mut map = self.kv_role_resources()?;
        if map.remove(role_id).is_none() {
            return Ok(());
        }
        if map.is_empty() {
            self.kv.delete(ROLE_RESOURCES_KEY)
        } else {
            self.kv.set_json(ROLE_RESOURCES_KEY, &map)
        }
    }

    /// Reads a role's resources: key-value first, then the structured store.
    ///
    /// An unparsable key-value map does not hide the structured record; its
    /// integrity error is returned only when the structured store has nothing.
    pub async fn get_role_resources(&self, role_id: &str) -> StorageResult<Option<CategoryResources>> {
        let status = self.init().await;
        let kv_issue = match self.kv_role_resources() {
            Ok(mut map) => match map.remove(role_id) {
                Some(resources) => return Ok(Some(resources)),
                None => None,
            },
            Err(StorageError::Integrity(issue)) => {
                self.logger.warn(
                    "Unreadable key-value role resources, checking structured store",
                    log_data!("record" => issue.to_string()),
                );
                Some(issue)
            }
            Err(e) => return Err(e),
        };

        if status.structured_available {
            if let Some(record) = self.structured.get_role_resources(role_id).await? {
                return Ok(Some(record.resources));
            }
        }
        match kv_issue {
            Some(issue) => Err(StorageError::Integrity(issue)),
            None => Ok(None),
        }
    }

    /// Removes a role's resources from both backends.
    pub async fn delete_role_resources(&self, role_id: &str) -> StorageResult<()> {
        let status = self.init().await;
        self.remove_kv_role_resources(role_id)?;
        if status.structured_available {
            self.structured.delete_role_resources(role_id).await?;
        }
        Ok(())
    }

    /// Every role's resources across both backends.
    pub async fn all_role_resources(&self) -> StorageResult<RoleResourceMap> {
        let status = self.init().await;
        let mut all = RoleResourceMap::new();
        if status.structured_available {
            for record in self.structured.all_role_resources().await? {
                all.insert(record.role_id, record.resources);
            }
        }
        all.extend(self.kv_role_resources()?);
        Ok(all)
    }

    /// Replaces every role's resources (backup import).
    ///
    /// Both backends are cleared first; roles absent from `map` are gone
    /// afterwards.
    pub async fn replace_all_role_resources(&self, map: RoleResourceMap) -> StorageResult<()> {
        let status = self.init().await;
        self.kv.delete(ROLE_RESOURCES_KEY)?;
        if status.structured_available {
            self.structured.clear(ROLE_RESOURCES_COLLECTION).await?;
        }
        for (role_id, resources) in map {
            self.store_role_resources(&role_id, resources).await?;
        }
        Ok(())
    }

    /// Moves key-value data into the structured store.
    ///
    /// # Errors
    ///
    /// `Unavailable` when the structured store could not be opened.
    pub async fn migrate(&self) -> StorageResult<MigrationReport> {
        let status = self.init().await;
        if !status.structured_available {
            return Err(StorageError::Unavailable(
                "cannot migrate without the structured store".to_string(),
            ));
        }
        migration::migrate(self).await
    }

    /// Removes temporary and probe keys from the key-value store and, when
    /// `max_age` is given, structured file records older than it.
    pub async fn cleanup(&self, max_age: Option<Duration>) -> StorageResult<CleanupReport> {
        let status = self.init().await;
        let mut report = CleanupReport::default();

        for key in self.kv.keys()? {
            if key.starts_with(TEMP_KEY_MARKER) || key == PROBE_KEY {
                self.kv.delete(&key)?;
                report.key_value += 1;
            }
        }

        if let Some(max_age) = max_age {
            if status.structured_available {
                report.structured = self.structured.cleanup_expired_files(max_age).await?;
            }
        }

        self.logger.info(
            "Storage cleanup finished",
            log_data!("keyValue" => report.key_value, "structured" => report.structured),
        );
        Ok(report)
    }

    /// Changes the preferred backend for small writes.
    ///
    /// Switching to the structured store migrates key-value data first.
    ///
    /// # Returns
    ///
    /// The migration report when a migration ran.
    pub async fn switch_backend(&self, target: Backend) -> StorageResult<Option<MigrationReport>> {
        let status = self.init().await;
        if status.preferred == target {
            return Ok(None);
        }

        let report = match target {
            Backend::Structured => Some(self.migrate().await?),
            Backend::KeyValue => None,
        };

        let mut state = self.state.lock().await;
        if let Some(status) = state.as_mut() {
            status.preferred = target;
            if target == Backend::KeyValue {
                status.quota_flipped = false;
            }
        }
        self.logger.info("Preferred backend switched", log_data!("backend" => target));
        Ok(report)
    }

    /// Usage of both backends plus cleanup recommendations.
    pub async fn stats(&self) -> StorageResult<RouterStats> {
        let status = self.init().await;
        let structured = if status.structured_available {
            Some(self.structured.stats().await?)
        } else {
            None
        };

        let mut recommendations = self.estimator.recommendations();
        if let Some(stats) = &structured {
            if stats.total_file_bytes > STRUCTURED_SWEEP_HINT_BYTES {
                recommendations.push(
                    "Structured store holds a large volume of files; sweep expired files periodically"
                        .to_string(),
                );
            }
        }
        if !status.structured_available {
            recommendations.push(
                "Structured store is unavailable; large files cannot be stored in this session"
                    .to_string(),
            );
        }

        Ok(RouterStats {
            status,
            key_value: self.estimator.estimate_usage(),
            warning: self.estimator.warning_level(),
            largest_entries: self.estimator.largest_entries(5),
            structured,
            recommendations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FILES_COLLECTION;
    use crate::database::MemoryObjectStore;
    use crate::kv::MemoryKeyValueStore;
    use crate::models::{Payload, ResourceItem};
    use std::sync::Arc;

    fn config() -> StorageConfig {
        StorageConfig {
            kv_ceiling: 64 * 1024,
            kv_free_floor: 1024,
            auto_switch_threshold: 1024,
            ..StorageConfig::default()
        }
    }

    fn router_with(config: StorageConfig, kv_capacity: usize) -> HybridRouter {
        let kv = KvAdapter::new(Arc::new(MemoryKeyValueStore::with_capacity(kv_capacity)));
        let structured = StructuredStore::new(Arc::new(MemoryObjectStore::new()));
        HybridRouter::new(config, kv, structured)
    }

    fn png(size: usize) -> NewFile {
        NewFile::from_bytes("r1", "eat", "a.png", "image/png", vec![7u8; size])
    }

    fn resources(name: &str) -> CategoryResources {
        let mut map = CategoryResources::new();
        map.insert("eat".to_string(), vec![ResourceItem::new("i1", name)]);
        map
    }

    #[tokio::test]
    async fn init_is_idempotent_and_prefers_key_value_with_space() {
        let router = router_with(config(), 1024 * 1024);
        let first = router.init().await;
        let second = router.init().await;
        assert_eq!(first, second);
        assert_eq!(first.preferred, Backend::KeyValue);
        assert!(first.structured_available);
    }

    #[tokio::test]
    async fn auto_mode_prefers_structured_without_free_space() {
        let router = router_with(config(), 1024 * 1024);
        router.kv().set("bulk", &"x".repeat(64 * 1024 - 512)).unwrap();
        assert_eq!(router.init().await.preferred, Backend::Structured);
    }

    #[tokio::test]
    async fn threshold_routes_at_boundary() {
        let router = router_with(config(), 1024 * 1024);
        let below = router.route_write(png(1023)).await.unwrap();
        let at = router.route_write(png(1024)).await.unwrap();
        let above = router.route_write(png(1025)).await.unwrap();

        assert_eq!(router.placement(&below), Some(Backend::KeyValue));
        assert_eq!(router.placement(&at), Some(Backend::Structured));
        assert_eq!(router.placement(&above), Some(Backend::Structured));
        assert!(router.kv().get(&kv_file_key(&below)).unwrap().is_some());
    }

    #[tokio::test]
    async fn key_value_write_stores_data_url() {
        let router = router_with(config(), 1024 * 1024);
        let id = router.route_write(png(10)).await.unwrap();
        let record = router.route_read(&id).await.unwrap().unwrap();
        match record.payload {
            Payload::DataUrl(url) => assert!(url.starts_with("data:image/png;base64,")),
            other => panic!("expected data URL, got {:?}", other),
        }
        assert_eq!(record.byte_size, 10);
    }

    #[tokio::test]
    async fn quota_failure_flips_backend_for_the_session() {
        // Estimator ceiling is generous, the real store is tiny: the write
        // fails at the backend, not in the prediction.
        let router = router_with(config(), 300);
        let first = router.route_write(png(500)).await.unwrap();
        assert_eq!(router.placement(&first), Some(Backend::Structured));

        let status = router.status().await;
        assert_eq!(status.preferred, Backend::Structured);
        assert!(status.quota_flipped);

        let second = router.route_write(png(10)).await.unwrap();
        assert_eq!(router.placement(&second), Some(Backend::Structured));
        assert!(router.route_read(&first).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn degraded_mode_rejects_large_writes() {
        let kv = KvAdapter::new(Arc::new(MemoryKeyValueStore::new()));
        let structured = StructuredStore::new(Arc::new(MemoryObjectStore::unavailable("private")));
        let router = HybridRouter::new(config(), kv, structured);

        assert!(!router.init().await.structured_available);
        let small = router.route_write(png(10)).await.unwrap();
        assert!(router.route_read(&small).await.unwrap().is_some());
        let err = router.route_write(png(4096)).await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
    }

    #[tokio::test]
    async fn empty_payload_is_rejected() {
        let router = router_with(config(), 1024 * 1024);
        let err = router.route_write(png(0)).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn undecodable_data_url_is_rejected_before_storing() {
        let router = router_with(config(), 1024 * 1024);
        let file = NewFile {
            payload: Payload::DataUrl("data:image/png;base64,@@@@".to_string()),
            ..png(1)
        };
        let err = router.route_write(file).await.unwrap_err();
        assert!(matches!(err, StorageError::Encoding(ref reason) if reason == "undecodable payload"));
        assert!(router.kv().keys().unwrap().is_empty());
        assert_eq!(router.structured().count_of(FILES_COLLECTION).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn corrupt_key_value_copy_does_not_hide_structured_record() {
        let kv_backend = Arc::new(MemoryKeyValueStore::new());
        let object_backend = Arc::new(MemoryObjectStore::new());
        let session = |kv: Arc<MemoryKeyValueStore>, objects: Arc<MemoryObjectStore>| {
            HybridRouter::new(config(), KvAdapter::new(kv), StructuredStore::new(objects))
        };

        let first = session(kv_backend.clone(), object_backend.clone());
        let id = first.route_write(png(2048)).await.unwrap();
        first.kv().set(&kv_file_key(&id), "{garbage").unwrap();
        first.kv().set(&kv_file_key("file_lost"), "{garbage").unwrap();

        let second = session(kv_backend, object_backend);
        let record = second.route_read(&id).await.unwrap().unwrap();
        assert_eq!(record.payload.to_bytes().unwrap(), vec![7u8; 2048]);
        assert_eq!(second.placement(&id), Some(Backend::Structured));
        assert!(matches!(
            second.route_read("file_lost").await,
            Err(StorageError::Integrity(_))
        ));
    }

    #[tokio::test]
    async fn corrupt_role_resource_map_does_not_hide_structured_record() {
        let router = router_with(config(), 1024 * 1024);
        router.init().await;
        router
            .structured()
            .store_role_resources("r1", resources("noodles"))
            .await
            .unwrap();
        router.kv().set(ROLE_RESOURCES_KEY, "{broken").unwrap();

        assert_eq!(
            router.get_role_resources("r1").await.unwrap(),
            Some(resources("noodles"))
        );
        assert!(matches!(
            router.get_role_resources("r2").await,
            Err(StorageError::Integrity(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_from_both_backends() {
        let router = router_with(config(), 1024 * 1024);
        let small = router.route_write(png(10)).await.unwrap();
        let large = router.route_write(png(2048)).await.unwrap();
        router.delete_file(&small).await.unwrap();
        router.delete_file(&large).await.unwrap();
        assert!(router.route_read(&small).await.unwrap().is_none());
        assert!(router.route_read(&large).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn role_resources_move_between_backends_without_stale_copies() {
        let router = router_with(config(), 1024 * 1024);
        assert_eq!(
            router.store_role_resources("r1", resources("small")).await.unwrap(),
            Backend::KeyValue
        );

        let big = resources(&"n".repeat(2048));
        assert_eq!(
            router.store_role_resources("r1", big.clone()).await.unwrap(),
            Backend::Structured
        );
        assert!(router.kv_role_resources().unwrap().is_empty());
        assert_eq!(router.get_role_resources("r1").await.unwrap(), Some(big));

        router.store_role_resources("r1", resources("again")).await.unwrap();
        assert!(router.structured().get_role_resources("r1").await.unwrap().is_none());
        assert_eq!(
            router.get_role_resources("r1").await.unwrap(),
            Some(resources("again"))
        );
    }

    #[tokio::test]
    async fn replace_all_overwrites_every_role() {
        let router = router_with(config(), 1024 * 1024);
        router.store_role_resources("old", resources("x")).await.unwrap();
        router
            .store_role_resources("big", resources(&"n".repeat(2048)))
            .await
            .unwrap();

        let mut replacement = RoleResourceMap::new();
        replacement.insert("new".to_string(), resources("y"));
        router.replace_all_role_resources(replacement.clone()).await.unwrap();

        assert_eq!(router.all_role_resources().await.unwrap(), replacement);
    }

    #[tokio::test]
    async fn cleanup_removes_temp_and_probe_keys_only() {
        let router = router_with(config(), 1024 * 1024);
        let kept = router.route_write(png(10)).await.unwrap();
        router.kv().set("temp_upload_1", "x").unwrap();
        router.kv().set(PROBE_KEY, "x").unwrap();
        router.kv().set("attempt_count", "1").unwrap();

        let report = router.cleanup(None).await.unwrap();
        assert_eq!(report, CleanupReport { key_value: 2, structured: 0 });
        assert!(router.route_read(&kept).await.unwrap().is_some());
        assert!(router.kv().get("attempt_count").unwrap().is_some());
    }

    #[tokio::test]
    async fn switch_to_key_value_clears_flip() {
        let router = router_with(config(), 300);
        router.route_write(png(500)).await.unwrap();
        assert!(router.status().await.quota_flipped);

        assert!(router.switch_backend(Backend::KeyValue).await.unwrap().is_none());
        let status = router.status().await;
        assert_eq!(status.preferred, Backend::KeyValue);
        assert!(!status.quota_flipped);
    }

    #[tokio::test]
    async fn stats_report_both_backends() {
        let router = router_with(config(), 1024 * 1024);
        router.route_write(png(10)).await.unwrap();
        router.route_write(png(2048)).await.unwrap();
        let stats = router.stats().await.unwrap();
        assert!(stats.key_value.used > 0);
        assert_eq!(stats.structured.unwrap().files, 1);
        assert_eq!(stats.largest_entries.len(), 1);
    }
}
