//! # Chunked Block Store
//!
//! Stores payloads too large for a single record as a metadata record plus
//! fixed-size chunk records in the structured store, and reassembles them on
//! read.
//!
//! ## Upload Lifecycle
//!
//! ```text
//! 1. Metadata    → written with status `uploading` before any chunk
//! 2. Chunks      → written one at a time, chunk i+1 only after chunk i
//! 3. Completion  → metadata flipped to `completed` with a sha256 checksum
//! 4. Reassembly  → chunks sorted by index, decoded and concatenated
//! 5. Removal     → chunks first, metadata last
//! ```
//!
//! An upload interrupted between steps 1 and 3 keeps its `uploading`
//! metadata. Such uploads never reassemble and are removed by the integrity
//! job's cleanup.
//!
//! ## Error Handling
//!
//! [`ChunkedBlockStore::fetch_large`] never returns partial data: any
//! mismatch between the metadata and the stored chunks is logged and the
//! read yields `None`. [`ChunkedBlockStore::reassemble`] performs the same
//! read but reports the mismatch as [`StorageError::Reassembly`].

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::constants::{FILE_CHUNKS_COLLECTION, FILE_METADATA_COLLECTION};
use crate::database::StructuredStore;
use crate::errors::{StorageError, StorageResult};
use crate::logging::Logger;
use crate::log_data;
use crate::models::{ChunkRecord, FileMetadataRecord, LargeFileMeta, UploadStatus};
use crate::utils::{compute_checksum, decode_base64, encode_base64, encode_data_url, generate_record_id, now_millis};
use crate::validation::RecordValidator;

/// A reassembled chunked file.
#[derive(Debug, Clone, PartialEq)]
pub struct LargeFile {
    pub metadata: FileMetadataRecord,
    pub data: Vec<u8>,
}

impl LargeFile {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn base64(&self) -> String {
        encode_base64(&self.data)
    }

    /// The payload as a `data:` URL using the recorded MIME type.
    pub fn data_url(&self) -> String {
        encode_data_url(&self.metadata.mime_type, &self.data)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypeUsage {
    pub count: usize,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUsageStats {
    pub total_files: usize,
    pub total_size: u64,
    /// Chunk records actually present in `fileChunks`
    pub total_chunks: u64,
    /// Sum of `totalChunks` declared by the metadata records
    pub expected_chunks: u64,
    /// Chunk records whose file has no metadata record
    pub orphan_chunks: u64,
    pub by_type: BTreeMap<String, TypeUsage>,
}

/// Chunked storage for large binary payloads.
#[derive(Clone)]
pub struct ChunkedBlockStore {
    store: StructuredStore,
    chunk_size: usize,
    logger: Logger,
}

impl ChunkedBlockStore {
    /// Creates a block store writing `chunk_size`-byte chunks into `store`.
    ///
    /// # Arguments
    ///
    /// * `store` - An opened structured store
    /// * `chunk_size` - Raw bytes per chunk (clamped to at least 1)
    pub fn new(store: StructuredStore, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
            logger: Logger::new("chunked"),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Stores a large payload as a chunked file.
    ///
    /// # Arguments
    ///
    /// * `bytes` - The raw payload
    /// * `meta` - Descriptive fields recorded on the metadata record
    ///
    /// # Returns
    ///
    /// The generated file id.
    ///
    /// # Errors
    ///
    /// - `InvalidInput`: the payload is empty
    /// - any structured-store error raised while writing; when a chunk write
    ///   fails the metadata stays `uploading`
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let meta = LargeFileMeta::new("intro.mp4", "video/mp4", "role-1", "travel");
    /// let file_id = chunked.store_large(&video_bytes, meta).await?;
    /// ```
    pub async fn store_large(&self, bytes: &[u8], meta: LargeFileMeta) -> StorageResult<String> {
        RecordValidator::validate_non_empty(bytes)?;

        let file_id = generate_record_id("file");
        let total_chunks = bytes.len().div_ceil(self.chunk_size) as u32;
        let now = now_millis();

        let mut metadata = FileMetadataRecord {
            id: file_id.clone(),
            file_name: meta.file_name,
            file_type: meta.kind,
            mime_type: meta.mime_type,
            total_size: bytes.len() as u64,
            chunk_size: self.chunk_size as u64,
            total_chunks,
            role_id: meta.role_id,
            resource_type: meta.resource_type,
            resource_id: meta.resource_id,
            created_at: now,
            updated_at: now,
            status: UploadStatus::Uploading,
            checksum: Some(compute_checksum(bytes)),
            metadata: meta.metadata,
        };
        self.store.put(FILE_METADATA_COLLECTION, &metadata).await?;

        for (index, slice) in bytes.chunks(self.chunk_size).enumerate() {
            let chunk = ChunkRecord {
                id: ChunkRecord::chunk_id(&file_id, index as u32),
                file_id: file_id.clone(),
                chunk_index: index as u32,
                total_chunks,
                data: encode_base64(slice),
                size: slice.len() as u64,
                timestamp: now_millis(),
            };
            if let Err(e) = self.store.put(FILE_CHUNKS_COLLECTION, &chunk).await {
                self.logger.error(
                    "Chunk write failed; upload left incomplete",
                    log_data!(
                        "fileId" => file_id,
                        "chunkIndex" => index,
                        "totalChunks" => total_chunks,
                        "error" => e.to_string()
                    ),
                );
                return Err(e);
            }
        }

        metadata.status = UploadStatus::Completed;
        metadata.updated_at = now_millis();
        self.store.put(FILE_METADATA_COLLECTION, &metadata).await?;

        self.logger.info(
            "Chunked file stored",
            log_data!(
                "fileId" => file_id,
                "totalSize" => metadata.total_size,
                "totalChunks" => total_chunks
            ),
        );
        Ok(file_id)
    }

    /// Reads a chunked file.
    ///
    /// # Returns
    ///
    /// `None` when the file does not exist or cannot be reassembled. Only
    /// structured-store failures are returned as errors.
    pub async fn fetch_large(&self, file_id: &str) -> StorageResult<Option<LargeFile>> {
        match self.reassemble(file_id).await {
            Ok(file) => Ok(file),
            Err(StorageError::Reassembly { file_id, reason }) => {
                self.logger.error(
                    "Reassembly failed",
                    log_data!("fileId" => file_id, "reason" => reason),
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Reads a chunked file, reporting why reassembly failed.
    ///
    /// # Errors
    ///
    /// `Reassembly` when the upload is not `completed`, the chunk count or
    /// indexes disagree with the metadata, a chunk does not decode, or the
    /// reassembled bytes fail the size or checksum check.
    pub async fn reassemble(&self, file_id: &str) -> StorageResult<Option<LargeFile>> {
        let metadata = match self.metadata(file_id).await? {
            Some(metadata) => metadata,
            None => return Ok(None),
        };
        let fail = |reason: String| StorageError::Reassembly {
            file_id: file_id.to_string(),
            reason,
        };

        if metadata.status != UploadStatus::Completed {
            return Err(fail(format!("upload status is {:?}", metadata.status).to_lowercase()));
        }

        let mut chunks = self.chunks(file_id).await?;
        if chunks.len() != metadata.total_chunks as usize {
            return Err(fail(format!(
                "expected {} chunks, found {}",
                metadata.total_chunks,
                chunks.len()
            )));
        }
        chunks.sort_by_key(|chunk| chunk.chunk_index);

        let mut data = Vec::with_capacity(metadata.total_size as usize);
        for (expected, chunk) in chunks.iter().enumerate() {
            if chunk.chunk_index as usize != expected {
                return Err(fail(format!(
                    "chunk indexes are not contiguous at {}",
                    expected
                )));
            }
            let bytes = decode_base64(&chunk.data)
                .map_err(|_| fail(format!("chunk {} is not valid base64", expected)))?;
            data.extend_from_slice(&bytes);
        }

        if data.len() as u64 != metadata.total_size {
            return Err(fail(format!(
                "expected {} bytes, reassembled {}",
                metadata.total_size,
                data.len()
            )));
        }
        if let Some(expected) = &metadata.checksum {
            if &compute_checksum(&data) != expected {
                return Err(fail("checksum mismatch".to_string()));
            }
        }

        Ok(Some(LargeFile { metadata, data }))
    }

    /// Removes every chunk of a file, then its metadata.
    pub async fn remove_large(&self, file_id: &str) -> StorageResult<()> {
        let chunks = self.chunks(file_id).await?;
        for chunk in &chunks {
            self.store.delete_by_key(FILE_CHUNKS_COLLECTION, &chunk.id).await?;
        }
        self.store.delete_by_key(FILE_METADATA_COLLECTION, file_id).await?;

        self.logger.debug(
            "Chunked file removed",
            log_data!("fileId" => file_id, "chunks" => chunks.len()),
        );
        Ok(())
    }

    pub async fn metadata(&self, file_id: &str) -> StorageResult<Option<FileMetadataRecord>> {
        self.store.get_by_key(FILE_METADATA_COLLECTION, file_id).await
    }

    /// Chunk records of a file in storage order.
    pub async fn chunks(&self, file_id: &str) -> StorageResult<Vec<ChunkRecord>> {
        self.store
            .get_all_by_index(FILE_CHUNKS_COLLECTION, "fileId", file_id)
            .await
    }

    /// Metadata of every chunked file owned by a role.
    pub async fn files_for_role(&self, role_id: &str) -> StorageResult<Vec<FileMetadataRecord>> {
        self.store
            .get_all_by_index(FILE_METADATA_COLLECTION, "roleId", role_id)
            .await
    }

    pub async fn all_metadata(&self) -> StorageResult<Vec<FileMetadataRecord>> {
        self.store.get_all(FILE_METADATA_COLLECTION).await
    }

    /// Uploads that never reached `completed`.
    pub async fn incomplete_uploads(&self) -> StorageResult<Vec<FileMetadataRecord>> {
        Ok(self
            .all_metadata()
            .await?
            .into_iter()
            .filter(|metadata| !metadata.is_complete())
            .collect())
    }

    /// Aggregates both collections.
    ///
    /// Declared and stored chunk counts are reported separately, so chunks
    /// missing from an interrupted upload and orphaned chunks both show up.
    pub async fn usage_stats(&self) -> StorageResult<ChunkUsageStats> {
        let mut stats = ChunkUsageStats::default();
        let mut known = BTreeSet::new();
        for metadata in self.all_metadata().await? {
            stats.total_files += 1;
            stats.total_size += metadata.total_size;
            stats.expected_chunks += u64::from(metadata.total_chunks);
            let usage = stats
                .by_type
                .entry(metadata.file_type.to_string())
                .or_default();
            usage.count += 1;
            usage.size += metadata.total_size;
            known.insert(metadata.id);
        }

        for chunk in self.store.get_all_raw(FILE_CHUNKS_COLLECTION).await? {
            stats.total_chunks += 1;
            let owned = chunk
                .get("fileId")
                .and_then(Value::as_str)
                .is_some_and(|file_id| known.contains(file_id));
            if !owned {
                stats.orphan_chunks += 1;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryObjectStore;
    use std::sync::Arc;

    async fn block_store(chunk_size: usize) -> ChunkedBlockStore {
        let store = StructuredStore::new(Arc::new(MemoryObjectStore::new()));
        store.open().await.unwrap();
        ChunkedBlockStore::new(store, chunk_size)
    }

    fn meta() -> LargeFileMeta {
        LargeFileMeta::new("clip.mp4", "video/mp4", "r1", "travel").with_resource_id("res-1")
    }

    #[tokio::test]
    async fn store_and_fetch_round_trip() {
        let chunked = block_store(4).await;
        let payload: Vec<u8> = (0..10).collect();
        let id = chunked.store_large(&payload, meta()).await.unwrap();

        let metadata = chunked.metadata(&id).await.unwrap().unwrap();
        assert_eq!(metadata.total_chunks, 3);
        assert_eq!(metadata.status, UploadStatus::Completed);
        assert_eq!(metadata.resource_id, "res-1");

        let file = chunked.fetch_large(&id).await.unwrap().unwrap();
        assert_eq!(file.data, payload);
        assert!(file.data_url().starts_with("data:video/mp4;base64,"));
        assert_eq!(file.base64(), encode_base64(&payload));
    }

    #[tokio::test]
    async fn exact_multiple_of_chunk_size() {
        let chunked = block_store(5).await;
        let id = chunked.store_large(&[7u8; 10], meta()).await.unwrap();
        assert_eq!(chunked.chunks(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_payload_is_rejected() {
        let chunked = block_store(4).await;
        let err = chunked.store_large(&[], meta()).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
        assert!(chunked.all_metadata().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_none() {
        let chunked = block_store(4).await;
        assert!(chunked.fetch_large("file_missing").await.unwrap().is_none());
        assert!(chunked.reassemble("file_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_chunk_fails_reassembly() {
        let chunked = block_store(4).await;
        let id = chunked.store_large(&[1u8; 12], meta()).await.unwrap();
        chunked
            .store
            .delete_by_key(FILE_CHUNKS_COLLECTION, &ChunkRecord::chunk_id(&id, 1))
            .await
            .unwrap();

        assert!(chunked.fetch_large(&id).await.unwrap().is_none());
        let err = chunked.reassemble(&id).await.unwrap_err();
        assert!(matches!(err, StorageError::Reassembly { ref reason, .. } if reason == "expected 3 chunks, found 2"));
    }

    #[tokio::test]
    async fn tampered_chunk_fails_checksum() {
        let chunked = block_store(4).await;
        let id = chunked.store_large(&[1u8; 8], meta()).await.unwrap();
        let mut chunk: ChunkRecord = chunked
            .store
            .get_by_key(FILE_CHUNKS_COLLECTION, &ChunkRecord::chunk_id(&id, 0))
            .await
            .unwrap()
            .unwrap();
        chunk.data = encode_base64(&[2u8; 4]);
        chunked.store.put(FILE_CHUNKS_COLLECTION, &chunk).await.unwrap();

        let err = chunked.reassemble(&id).await.unwrap_err();
        assert!(matches!(err, StorageError::Reassembly { ref reason, .. } if reason == "checksum mismatch"));
    }

    #[tokio::test]
    async fn uploading_status_never_reassembles() {
        let chunked = block_store(4).await;
        let id = chunked.store_large(&[1u8; 4], meta()).await.unwrap();
        let mut metadata = chunked.metadata(&id).await.unwrap().unwrap();
        metadata.status = UploadStatus::Uploading;
        chunked.store.put(FILE_METADATA_COLLECTION, &metadata).await.unwrap();

        assert!(chunked.fetch_large(&id).await.unwrap().is_none());
        assert_eq!(chunked.incomplete_uploads().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_deletes_chunks_and_metadata() {
        let chunked = block_store(4).await;
        let id = chunked.store_large(&[1u8; 9], meta()).await.unwrap();
        chunked.remove_large(&id).await.unwrap();
        assert!(chunked.metadata(&id).await.unwrap().is_none());
        assert!(chunked.chunks(&id).await.unwrap().is_empty());
        // Removing again is harmless.
        chunked.remove_large(&id).await.unwrap();
    }

    #[tokio::test]
    async fn usage_stats_group_by_type() {
        let chunked = block_store(4).await;
        chunked.store_large(&[1u8; 9], meta()).await.unwrap();
        chunked
            .store_large(&[1u8; 3], LargeFileMeta::new("a.png", "image/png", "r1", "eat"))
            .await
            .unwrap();

        let stats = chunked.usage_stats().await.unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_size, 12);
        assert_eq!(stats.total_chunks, 4);
        assert_eq!(stats.expected_chunks, 4);
        assert_eq!(stats.orphan_chunks, 0);
        assert_eq!(stats.by_type["video"], TypeUsage { count: 1, size: 9 });
        assert_eq!(chunked.files_for_role("r1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn usage_stats_count_stored_and_orphan_chunks() {
        let chunked = block_store(4).await;
        let id = chunked.store_large(&[1u8; 9], meta()).await.unwrap();
        chunked
            .store
            .delete_by_key(FILE_CHUNKS_COLLECTION, &ChunkRecord::chunk_id(&id, 1))
            .await
            .unwrap();
        let orphan = ChunkRecord {
            id: ChunkRecord::chunk_id("file_gone", 0),
            file_id: "file_gone".to_string(),
            chunk_index: 0,
            total_chunks: 1,
            data: encode_base64(&[1, 2]),
            size: 2,
            timestamp: 0,
        };
        chunked.store.put(FILE_CHUNKS_COLLECTION, &orphan).await.unwrap();

        let stats = chunked.usage_stats().await.unwrap();
        assert_eq!(stats.expected_chunks, 3);
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.orphan_chunks, 1);
    }
}
