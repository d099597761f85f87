//! # Admin Console Storage
//!
//! Browser-local persistence for a single-operator admin console. Small
//! records live in a size-limited, synchronous key-value store
//! (`localStorage`); large binaries and overflow live in an asynchronous,
//! indexed structured store (`IndexedDB`). A hybrid router decides where each
//! write goes and finds each read.
//!
//! ## Architecture
//!
//! - **Key-Value Adapter** (`kv`): string-only store with quota detection
//! - **Quota Estimator** (`quota`): usage, headroom and warnings
//! - **Structured Store** (`database`): versioned schema, collections and
//!   secondary indexes over an [`ObjectBackend`](database::ObjectBackend)
//! - **Chunked Block Store** (`chunked`): files split into fixed-size chunks
//!   with an upload lifecycle and checksum
//! - **Hybrid Router** (`router`): backend choice, sticky quota fallback,
//!   dual-check reads
//! - **Jobs** (`jobs`): migration and integrity repair
//! - **Admin Collections** (`collections`), **Backup** (`backup`) and
//!   **Preview URLs** (`preview`)
//!
//! Everything is reached through an explicit [`StorageContext`]; there are
//! no global singletons.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let storage = StorageContext::in_memory();
//! let id = storage
//!     .router()
//!     .route_write(NewFile::from_bytes("role-1", "eat", "noodles.png", "image/png", bytes))
//!     .await?;
//! let record = storage.router().route_read(&id).await?;
//! ```

use std::sync::Arc;

pub mod backup;
pub mod chunked;
pub mod collections;
pub mod config;
pub mod constants;
pub mod database;
pub mod errors;
pub mod jobs;
pub mod kv;
pub mod logging;
pub mod models;
pub mod preview;
pub mod quota;
pub mod router;
pub mod utils;
pub mod validation;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "wasm32")] {
        pub mod browser;
        pub use browser::LocalStorageBackend;
    }
}

use backup::BackupService;
use chunked::{ChunkedBlockStore, LargeFile};
use collections::AdminCollections;
use config::StorageConfig;
use database::{MemoryObjectStore, ObjectBackend, StructuredStore};
use errors::StorageResult;
use jobs::IntegrityJob;
use kv::{KeyValueBackend, KvAdapter, MemoryKeyValueStore};
use logging::Logger;
use models::LargeFileMeta;
use preview::{resolve_preview, Preview, PreviewRegistry};
use router::{HybridRouter, RouterStatus};

/// Installs the panic hook that forwards Rust panics to the browser console.
///
/// Safe to call repeatedly; a no-op outside `wasm32`.
pub fn set_panic_hook() {
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "wasm32")] {
            console_error_panic_hook::set_once();
        }
    }
}

/// Every storage component, wired together once per application.
#[derive(Clone)]
pub struct StorageContext {
    config: StorageConfig,
    router: Arc<HybridRouter>,
    chunked: ChunkedBlockStore,
    collections: AdminCollections,
    backup: BackupService,
    integrity: IntegrityJob,
    previews: PreviewRegistry,
    logger: Logger,
}

impl StorageContext {
    /// Builds a context over the given engines, loading configuration from
    /// the key-value store.
    ///
    /// # Errors
    ///
    /// Only a failure to read the key-value store; a missing or invalid
    /// stored configuration falls back to defaults.
    pub fn new(
        kv_backend: Arc<dyn KeyValueBackend>,
        object_backend: Arc<dyn ObjectBackend>,
    ) -> StorageResult<Self> {
        let kv = KvAdapter::new(kv_backend);
        let config = StorageConfig::load(&kv)?;
        Ok(Self::assemble(config, kv, StructuredStore::new(object_backend)))
    }

    /// Builds a context with an explicit configuration.
    pub fn with_config(
        config: StorageConfig,
        kv_backend: Arc<dyn KeyValueBackend>,
        object_backend: Arc<dyn ObjectBackend>,
    ) -> Self {
        Self::assemble(
            config,
            KvAdapter::new(kv_backend),
            StructuredStore::new(object_backend),
        )
    }

    /// A context over in-process engines with default configuration.
    pub fn in_memory() -> Self {
        Self::with_config(
            StorageConfig::default(),
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(MemoryObjectStore::new()),
        )
    }

    fn assemble(config: StorageConfig, kv: KvAdapter, structured: StructuredStore) -> Self {
        let chunked = ChunkedBlockStore::new(structured.clone(), config.chunk_size);
        let integrity = IntegrityJob::new(structured.clone(), chunked.clone());
        let router = Arc::new(HybridRouter::new(config.clone(), kv, structured));
        let collections = AdminCollections::new(router.clone());
        let backup = BackupService::new(router.clone(), collections.clone());
        Self {
            config,
            router,
            chunked,
            collections,
            backup,
            integrity,
            previews: PreviewRegistry::new(),
            logger: Logger::new("context"),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<HybridRouter> {
        &self.router
    }

    pub fn chunked(&self) -> &ChunkedBlockStore {
        &self.chunked
    }

    pub fn collections(&self) -> &AdminCollections {
        &self.collections
    }

    pub fn backup(&self) -> &BackupService {
        &self.backup
    }

    pub fn integrity(&self) -> &IntegrityJob {
        &self.integrity
    }

    pub fn previews(&self) -> &PreviewRegistry {
        &self.previews
    }

    /// Opens the structured store and picks the preferred backend.
    pub async fn init(&self) -> RouterStatus {
        self.router.init().await
    }

    /// Persists a new configuration; it applies to contexts built afterwards.
    pub fn save_config(&self, config: &StorageConfig) -> StorageResult<()> {
        config.validate()?;
        config.save(self.router.kv())
    }

    /// Stores a large binary in the chunked block store.
    pub async fn store_large(&self, bytes: &[u8], meta: LargeFileMeta) -> StorageResult<String> {
        self.router.init().await;
        self.chunked.store_large(bytes, meta).await
    }

    /// Reads a chunked file; `None` when missing or not reassemblable.
    pub async fn fetch_large(&self, file_id: &str) -> StorageResult<Option<LargeFile>> {
        self.router.init().await;
        self.chunked.fetch_large(file_id).await
    }

    /// Resolves a resource reference into something renderable.
    ///
    /// Chunked files are looked up first, then plain files through the
    /// router.
    pub async fn preview(&self, reference: &str) -> Preview {
        let status = self.router.init().await;
        if status.structured_available {
            match self.chunked.metadata(reference).await {
                Ok(Some(metadata)) => {
                    return match self.chunked.fetch_large(reference).await {
                        Ok(Some(file)) => {
                            Preview::Object(self.previews.create(file.data, &metadata.mime_type))
                        }
                        _ => Preview::Placeholder {
                            diagnostic: "file unavailable".to_string(),
                        },
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    return Preview::Placeholder {
                        diagnostic: e.diagnostic(),
                    }
                }
            }
        }
        resolve_preview(&self.previews, &self.router, reference).await
    }

    /// Stored file ids no role resource references. Report only.
    pub async fn unreferenced_files(&self) -> StorageResult<Vec<String>> {
        self.router.init().await;
        let references = self.router.all_role_resources().await?;
        let unreferenced = self.integrity.unreferenced_files(&references).await?;
        self.logger.info(
            "Unreferenced files found",
            crate::log_data!("count" => unreferenced.len()),
        );
        Ok(unreferenced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::STORAGE_CONFIG_KEY;
    use crate::models::{CategoryResources, ResourceItem};

    #[tokio::test]
    async fn context_loads_stored_config() {
        let kv_backend: Arc<dyn KeyValueBackend> = Arc::new(MemoryKeyValueStore::new());
        kv_backend
            .set_item(STORAGE_CONFIG_KEY, r#"{"chunkSize": 4}"#)
            .unwrap();
        let storage = StorageContext::new(kv_backend, Arc::new(MemoryObjectStore::new())).unwrap();
        assert_eq!(storage.config().chunk_size, 4);
        assert_eq!(storage.chunked().chunk_size(), 4);
    }

    #[tokio::test]
    async fn chunked_files_preview_as_object_urls() {
        let storage = StorageContext::in_memory();
        let id = storage
            .store_large(&[7u8; 16], LargeFileMeta::new("v.mp4", "video/mp4", "r1", "travel"))
            .await
            .unwrap();
        let preview = storage.preview(&id).await;
        assert!(matches!(preview, Preview::Object(_)));
        assert_eq!(storage.previews().live_count(), 1);
        drop(preview);
        assert_eq!(storage.previews().live_count(), 0);
    }

    #[tokio::test]
    async fn unreferenced_files_cover_both_stores() {
        let storage = StorageContext::in_memory();
        let large = storage
            .store_large(&[1u8; 8], LargeFileMeta::new("v.mp4", "video/mp4", "r1", "travel"))
            .await
            .unwrap();
        let mut item = ResourceItem::new("i1", "trip");
        item.video_url = Some(large.clone());
        let mut resources = CategoryResources::new();
        resources.insert("travel".into(), vec![item]);
        storage
            .router()
            .store_role_resources("r1", resources)
            .await
            .unwrap();

        assert!(storage.unreferenced_files().await.unwrap().is_empty());
        storage.router().replace_all_role_resources(Default::default()).await.unwrap();
        assert_eq!(storage.unreferenced_files().await.unwrap(), vec![large]);
    }
}
