//! # Record Validation
//!
//! Validation rules applied at the boundary between raw stored documents and
//! typed records. Every rule returns an [`IntegrityIssue`] value instead of
//! panicking, so the integrity job can collect problems across a whole
//! collection and single-record reads can surface them as
//! [`StorageError::Integrity`].
//!
//! ## Validation Categories
//!
//! - **Payload Validation**: file payloads must be present, non-empty and
//!   decodable; string payloads must carry a `data:<mime>;base64,` prefix
//! - **Upload Validation**: chunked uploads must be `completed` with exactly
//!   `totalChunks` chunk records
//! - **Input Validation**: writes are rejected before anything is stored
//!
//! ## Usage Examples
//!
//! ```rust
//! use admin_console_storage::validation::RecordValidator;
//! use serde_json::json;
//!
//! let issue = RecordValidator::validate_payload("files", "file_1", Some(&json!(""))).unwrap_err();
//! assert_eq!(issue.reason, "empty payload");
//! ```

use serde_json::Value;

use crate::constants::FILES_COLLECTION;
use crate::errors::{IntegrityIssue, StorageError, StorageResult};
use crate::models::{FileMetadataRecord, FileRecord, Payload};
use crate::utils::{decode_base64, split_data_url};

/// Static validation rules for stored records.
pub struct RecordValidator;

impl RecordValidator {
    /// Validates the raw `data` field of a stored file document.
    ///
    /// # Arguments
    ///
    /// * `collection` - Collection the record came from, for the report
    /// * `record_id` - Record id, for the report
    /// * `data` - The raw payload value, `None` when the field is absent
    ///
    /// # Errors
    ///
    /// Returns an [`IntegrityIssue`] whose reason is one of:
    /// - `missing payload`: the field is absent or `null`
    /// - `empty payload`: an empty string or empty binary buffer
    /// - `missing data URL prefix`: a string without `data:<mime>;base64,`
    /// - `undecodable payload`: the base64 body does not decode
    /// - `unsupported payload type`: neither a string nor a binary buffer
    pub fn validate_payload(
        collection: &str,
        record_id: &str,
        data: Option<&Value>,
    ) -> Result<(), IntegrityIssue> {
        let issue = |reason: &str| IntegrityIssue::new(collection, record_id, reason);

        match data {
            None | Some(Value::Null) => Err(issue("missing payload")),
            Some(Value::String(url)) => {
                if url.is_empty() {
                    return Err(issue("empty payload"));
                }
                Self::validate_data_url(url).map_err(issue)
            }
            Some(Value::Object(object)) => match object.get("binary") {
                Some(Value::String(encoded)) => {
                    if encoded.is_empty() {
                        return Err(issue("empty payload"));
                    }
                    decode_base64(encoded).map_err(|_| issue("undecodable payload"))?;
                    Ok(())
                }
                _ => Err(issue("unsupported payload type")),
            },
            Some(_) => Err(issue("unsupported payload type")),
        }
    }

    /// Validates a raw file document and converts it into a [`FileRecord`].
    ///
    /// The payload is checked first so that a corrupt payload is reported
    /// with its specific reason rather than a generic decode failure.
    pub fn validate_file_value(value: &Value) -> Result<FileRecord, IntegrityIssue> {
        let record_id = value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("<unknown>")
            .to_string();

        Self::validate_payload(FILES_COLLECTION, &record_id, value.get("data"))?;

        serde_json::from_value(value.clone()).map_err(|e| {
            IntegrityIssue::new(FILES_COLLECTION, &record_id, format!("malformed record: {}", e))
        })
    }

    /// Validates a typed file record before it is written.
    ///
    /// Applies the same rules as [`RecordValidator::validate_payload`], so a
    /// record accepted here is never rejected when read back.
    pub fn validate_file_record(record: &FileRecord) -> Result<(), IntegrityIssue> {
        let issue = |reason: &str| IntegrityIssue::new(FILES_COLLECTION, &record.id, reason);

        if record.payload.is_empty() {
            return Err(issue("empty payload"));
        }
        if let Payload::DataUrl(url) = &record.payload {
            Self::validate_data_url(url).map_err(issue)?;
        }
        Ok(())
    }

    /// Checks the `data:<mime>;base64,` prefix and that the body decodes.
    ///
    /// # Errors
    ///
    /// The failure reason: `missing data URL prefix`, `empty payload` or
    /// `undecodable payload`.
    pub fn validate_data_url(url: &str) -> Result<(), &'static str> {
        let (_, body) = split_data_url(url).ok_or("missing data URL prefix")?;
        if body.is_empty() {
            return Err("empty payload");
        }
        decode_base64(body).map_err(|_| "undecodable payload")?;
        Ok(())
    }

    /// Validates a chunked upload against the number of chunk records found.
    ///
    /// # Errors
    ///
    /// - `incomplete upload (status ...)`: the upload never reached `completed`
    /// - `chunk count mismatch`: the stored chunks disagree with `totalChunks`
    pub fn validate_upload(
        collection: &str,
        metadata: &FileMetadataRecord,
        chunk_count: usize,
    ) -> Result<(), IntegrityIssue> {
        if !metadata.is_complete() {
            let status = serde_json::to_value(metadata.status)
                .ok()
                .and_then(|value| value.as_str().map(str::to_string))
                .unwrap_or_default();
            return Err(IntegrityIssue::new(
                collection,
                &metadata.id,
                format!("incomplete upload (status {})", status),
            ));
        }
        if chunk_count != metadata.total_chunks as usize {
            return Err(IntegrityIssue::new(
                collection,
                &metadata.id,
                format!(
                    "chunk count mismatch: expected {}, found {}",
                    metadata.total_chunks, chunk_count
                ),
            ));
        }
        Ok(())
    }

    /// Rejects empty payloads before any record is written.
    pub fn validate_non_empty(bytes: &[u8]) -> StorageResult<()> {
        if bytes.is_empty() {
            return Err(StorageError::InvalidInput("payload is empty".to_string()));
        }
        Ok(())
    }

    /// Rejects blank identifiers used as storage keys.
    pub fn validate_id(field: &str, id: &str) -> StorageResult<()> {
        if id.trim().is_empty() {
            return Err(StorageError::InvalidInput(format!("{} must not be empty", field)));
        }
        Ok(())
    }
}
