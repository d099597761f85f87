//! # Integrity Job
//!
//! Scans the structured store for records that can no longer be served:
//!
//! - **files**: missing, empty or undecodable payloads and string payloads
//!   without a data-URL prefix
//! - **fileMetadata**: chunked uploads that never completed or whose chunk
//!   records disagree with `totalChunks`
//!
//! The scan never aborts on a bad record; every problem becomes an
//! [`IntegrityIssue`] in the report. [`IntegrityJob::cleanup_invalid`]
//! deletes whatever the scan flags and can be run repeatedly.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::chunked::ChunkedBlockStore;
use crate::constants::{FILES_COLLECTION, FILE_METADATA_COLLECTION};
use crate::database::StructuredStore;
use crate::errors::{IntegrityIssue, StorageResult};
use crate::logging::Logger;
use crate::log_data;
use crate::models::FileMetadataRecord;
use crate::router::RoleResourceMap;
use crate::validation::RecordValidator;

const UNKNOWN_ID: &str = "<unknown>";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub errors: Vec<IntegrityIssue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidCleanupReport {
    pub cleaned: usize,
    pub errors: Vec<String>,
}

/// Integrity checks over files and chunked uploads.
#[derive(Clone)]
pub struct IntegrityJob {
    store: StructuredStore,
    chunked: ChunkedBlockStore,
    logger: Logger,
}

impl IntegrityJob {
    pub fn new(store: StructuredStore, chunked: ChunkedBlockStore) -> Self {
        Self {
            store,
            chunked,
            logger: Logger::new("integrity"),
        }
    }

    /// Validates every file record and every chunked upload.
    ///
    /// # Returns
    ///
    /// Counts over both collections and one issue per invalid record.
    ///
    /// # Errors
    ///
    /// Only a failure to list a collection is returned; bad records are
    /// reported, not raised.
    pub async fn check_integrity(&self) -> StorageResult<IntegrityReport> {
        let mut report = IntegrityReport::default();

        for value in self.store.get_all_raw(FILES_COLLECTION).await? {
            report.total += 1;
            match RecordValidator::validate_file_value(&value) {
                Ok(_) => report.valid += 1,
                Err(issue) => report.errors.push(issue),
            }
        }

        for value in self.store.get_all_raw(FILE_METADATA_COLLECTION).await? {
            report.total += 1;
            match self.check_upload(value).await? {
                None => report.valid += 1,
                Some(issue) => report.errors.push(issue),
            }
        }

        report.invalid = report.errors.len();
        self.logger.info(
            "Integrity check finished",
            log_data!("total" => report.total, "invalid" => report.invalid),
        );
        Ok(report)
    }

    async fn check_upload(&self, value: Value) -> StorageResult<Option<IntegrityIssue>> {
        let id = record_id(&value, "id");
        let metadata: FileMetadataRecord = match serde_json::from_value(value) {
            Ok(metadata) => metadata,
            Err(e) => {
                return Ok(Some(IntegrityIssue::new(
                    FILE_METADATA_COLLECTION,
                    id,
                    format!("malformed record: {}", e),
                )))
            }
        };
        let chunk_count = self.chunked.chunks(&metadata.id).await?.len();
        Ok(RecordValidator::validate_upload(FILE_METADATA_COLLECTION, &metadata, chunk_count).err())
    }

    /// Deletes every record the integrity check flags.
    ///
    /// Incomplete uploads are removed chunks first through the block store.
    /// A failed deletion is recorded and the cleanup continues.
    pub async fn cleanup_invalid(&self) -> StorageResult<InvalidCleanupReport> {
        let report = self.check_integrity().await?;
        let mut cleanup = InvalidCleanupReport::default();

        for issue in report.errors {
            if issue.record_id == UNKNOWN_ID {
                cleanup
                    .errors
                    .push(format!("{}: record has no id and cannot be removed", issue.collection));
                continue;
            }
            let removed = if issue.collection == FILE_METADATA_COLLECTION {
                self.chunked.remove_large(&issue.record_id).await
            } else {
                self.store.delete_file(&issue.record_id).await
            };
            match removed {
                Ok(()) => cleanup.cleaned += 1,
                Err(e) => {
                    self.logger.warn(
                        "Failed to remove invalid record",
                        log_data!("record" => issue.to_string(), "error" => e.to_string()),
                    );
                    cleanup.errors.push(format!("{}: {}", issue, e));
                }
            }
        }

        self.logger.info(
            "Invalid records cleaned",
            log_data!("cleaned" => cleanup.cleaned, "errors" => cleanup.errors.len()),
        );
        Ok(cleanup)
    }

    /// Stored file ids that no role resource references.
    ///
    /// Covers both plain file records and chunked files. Nothing is deleted;
    /// the caller decides what to do with the list.
    pub async fn unreferenced_files(&self, references: &RoleResourceMap) -> StorageResult<Vec<String>> {
        let referenced: BTreeSet<&str> = references
            .values()
            .flat_map(|categories| categories.values())
            .flatten()
            .flat_map(|item| item.attachments())
            .collect();

        let mut unreferenced = Vec::new();
        for collection in [FILES_COLLECTION, FILE_METADATA_COLLECTION] {
            for value in self.store.get_all_raw(collection).await? {
                let id = record_id(&value, "id");
                if id != UNKNOWN_ID && !referenced.contains(id.as_str()) {
                    unreferenced.push(id);
                }
            }
        }
        Ok(unreferenced)
    }
}

fn record_id(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_ID)
        .to_string()
}
