use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Failures raised by a raw backend engine.
///
/// Backends only know about their own mechanics; the adapters translate these
/// into [`StorageError`] with the key or collection that was involved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("unknown collection: {0}")]
    UnknownCollection(String),
    #[error("unknown index `{index}` on collection `{collection}`")]
    UnknownIndex { collection: String, index: String },
    #[error("record has no string key at `{key_path}`")]
    MissingKey { key_path: String },
    #[error("schema version {requested} is older than stored version {current}")]
    VersionDowngrade { requested: u32, current: u32 },
    #[error("{0}")]
    Failure(String),
}

/// A record that failed validation.
///
/// Integrity problems are values, not panics: the jobs collect them into
/// reports and single-record reads return them inside
/// [`StorageError::Integrity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityIssue {
    pub collection: String,
    pub record_id: String,
    pub reason: String,
}

impl IntegrityIssue {
    pub fn new(
        collection: impl Into<String>,
        record_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            record_id: record_id.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.collection, self.record_id, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage quota exceeded writing `{key}` ({attempted} units)")]
    Quota { key: String, attempted: usize },
    #[error("Structured store unavailable: {0}")]
    Unavailable(String),
    #[error("Integrity error: {0}")]
    Integrity(IntegrityIssue),
    #[error("Reassembly failed for {file_id}: {reason}")]
    Reassembly { file_id: String, reason: String },
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<BackendError> for StorageError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Unavailable(reason) => StorageError::Unavailable(reason),
            other => StorageError::Backend(other.to_string()),
        }
    }
}

/// Stage of an upload that a failure is reported against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStage {
    Encode,
    Quota,
    Write,
}

impl StorageError {
    pub fn is_quota(&self) -> bool {
        matches!(self, StorageError::Quota { .. })
    }

    /// Upload stage shown next to the retry action.
    pub fn stage(&self) -> UploadStage {
        match self {
            StorageError::Encoding(_) | StorageError::InvalidInput(_) => UploadStage::Encode,
            StorageError::Quota { .. } => UploadStage::Quota,
            _ => UploadStage::Write,
        }
    }

    /// Short text rendered in place of a resource that cannot be displayed.
    pub fn diagnostic(&self) -> String {
        match self {
            StorageError::Integrity(issue) => format!("corrupt record: {}", issue.reason),
            StorageError::Reassembly { .. } => "file unavailable".to_string(),
            StorageError::Unavailable(_) => "storage unavailable".to_string(),
            StorageError::Quota { .. } => "storage full".to_string(),
            StorageError::Encoding(_) => "unreadable data".to_string(),
            _ => "storage error".to_string(),
        }
    }
}
