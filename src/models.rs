use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::constants::ROLE_RESOURCES_VERSION;
use crate::errors::{StorageError, StorageResult};
use crate::utils;
use crate::validation::RecordValidator;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Video,
    Document,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Image => "image",
            FileKind::Video => "video",
            FileKind::Document => "document",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "image" => Ok(FileKind::Image),
            "video" => Ok(FileKind::Video),
            "document" => Ok(FileKind::Document),
            other => Err(format!("unknown file kind `{}`", other)),
        }
    }
}

/// Binary content of a stored file.
///
/// Serialized untagged: a data URL is a plain JSON string (the legacy shape
/// written by the key-value path), a raw buffer is `{"binary": "<base64>"}`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum Payload {
    DataUrl(String),
    Binary {
        #[serde(with = "utils::base64_bytes")]
        binary: Vec<u8>,
    },
}

impl Payload {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Payload::Binary { binary: bytes }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Payload::DataUrl(url) => url.is_empty(),
            Payload::Binary { binary } => binary.is_empty(),
        }
    }

    /// Raw size in bytes, computed without decoding a data URL.
    pub fn byte_len(&self) -> usize {
        match self {
            Payload::DataUrl(url) => utils::split_data_url(url)
                .map(|(_, body)| utils::decoded_len(body))
                .unwrap_or(0),
            Payload::Binary { binary } => binary.len(),
        }
    }

    pub fn to_bytes(&self) -> StorageResult<Vec<u8>> {
        match self {
            Payload::DataUrl(url) => utils::decode_data_url(url).map(|(_, bytes)| bytes),
            Payload::Binary { binary } => Ok(binary.clone()),
        }
    }

    /// Converts the payload into a data URL; the key-value store only holds strings.
    pub fn into_data_url(self, mime_type: &str) -> Self {
        match self {
            Payload::Binary { binary } => Payload::DataUrl(utils::encode_data_url(mime_type, &binary)),
            url => url,
        }
    }
}

/// A stored binary attachment.
///
/// Field names follow the records already persisted by the console
/// (`type`, `roleId`, `resourceType`, `fileSize`, `data`, `timestamp`).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    #[serde(rename = "roleId")]
    pub owner_id: String,
    #[serde(rename = "resourceType")]
    pub resource_category: String,
    pub file_name: String,
    #[serde(rename = "fileSize")]
    pub byte_size: u64,
    #[serde(default)]
    pub mime_type: String,
    #[serde(rename = "data")]
    pub payload: Payload,
    #[serde(rename = "timestamp")]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl FileRecord {
    /// MIME type recorded on the file, or the one embedded in a data URL.
    pub fn effective_mime(&self) -> String {
        if !self.mime_type.is_empty() {
            return self.mime_type.clone();
        }
        match &self.payload {
            Payload::DataUrl(url) => utils::split_data_url(url)
                .map(|(mime, _)| mime.to_string())
                .unwrap_or_default(),
            Payload::Binary { .. } => String::new(),
        }
    }
}

/// Input for a new file write; the id and timestamp are assigned on store.
#[derive(Clone, Debug, PartialEq)]
pub struct NewFile {
    pub kind: FileKind,
    pub owner_id: String,
    pub resource_category: String,
    pub file_name: String,
    pub mime_type: String,
    pub payload: Payload,
    pub metadata: Map<String, Value>,
}

impl NewFile {
    /// Builds a binary file, deriving its kind from the MIME type.
    pub fn from_bytes(
        owner_id: impl Into<String>,
        resource_category: impl Into<String>,
        file_name: &str,
        mime_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        let mime_type = mime_type.into();
        Self {
            kind: utils::categorize_content_type(&mime_type),
            owner_id: owner_id.into(),
            resource_category: resource_category.into(),
            file_name: utils::sanitize_filename(file_name),
            mime_type,
            payload: Payload::from_bytes(bytes),
            metadata: Map::new(),
        }
    }

    /// Builds a file from an existing data URL.
    pub fn from_data_url(
        owner_id: impl Into<String>,
        resource_category: impl Into<String>,
        file_name: &str,
        data_url: impl Into<String>,
    ) -> StorageResult<Self> {
        let data_url = data_url.into();
        RecordValidator::validate_data_url(&data_url)
            .map_err(|reason| StorageError::Encoding(reason.to_string()))?;
        let mime_type = utils::split_data_url(&data_url)
            .map(|(mime, _)| mime.to_string())
            .unwrap_or_default();
        Ok(Self {
            kind: utils::categorize_content_type(&mime_type),
            owner_id: owner_id.into(),
            resource_category: resource_category.into(),
            file_name: utils::sanitize_filename(file_name),
            mime_type,
            payload: Payload::DataUrl(data_url),
            metadata: Map::new(),
        })
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn byte_size(&self) -> usize {
        self.payload.byte_len()
    }

    pub fn into_record(self, id: String, created_at: i64) -> FileRecord {
        let byte_size = self.byte_size() as u64;
        FileRecord {
            id,
            kind: self.kind,
            owner_id: self.owner_id,
            resource_category: self.resource_category,
            file_name: self.file_name,
            byte_size,
            mime_type: self.mime_type,
            payload: self.payload,
            created_at,
            metadata: self.metadata,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Uploading,
    Completed,
    Error,
}

/// One fixed-size slice of a chunked file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub id: String,
    pub file_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// Base64 of this slice
    pub data: String,
    /// Raw byte length of this slice
    pub size: u64,
    pub timestamp: i64,
}

impl ChunkRecord {
    pub fn chunk_id(file_id: &str, index: u32) -> String {
        format!("{}_chunk_{}", file_id, index)
    }
}

/// Metadata of a chunked file, tracked separately from its chunks.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadataRecord {
    pub id: String,
    pub file_name: String,
    pub file_type: FileKind,
    pub mime_type: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub role_id: String,
    pub resource_type: String,
    #[serde(default)]
    pub resource_id: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub status: UploadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl FileMetadataRecord {
    pub fn is_complete(&self) -> bool {
        self.status == UploadStatus::Completed
    }
}

/// Descriptive fields supplied when storing a large file.
#[derive(Clone, Debug, PartialEq)]
pub struct LargeFileMeta {
    pub file_name: String,
    pub kind: FileKind,
    pub mime_type: String,
    pub role_id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub metadata: Map<String, Value>,
}

impl LargeFileMeta {
    pub fn new(
        file_name: &str,
        mime_type: impl Into<String>,
        role_id: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        let mime_type = mime_type.into();
        Self {
            file_name: utils::sanitize_filename(file_name),
            kind: utils::categorize_content_type(&mime_type),
            mime_type,
            role_id: role_id.into(),
            resource_type: resource_type.into(),
            resource_id: String::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = resource_id.into();
        self
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StandbyType {
    Long,
    Short,
    Moyu,
}

/// One entry of a role's categorized resource list.
///
/// Attachment fields hold either a file record id or an inline data URL.
/// Fields this crate does not know about are kept in `extra`, so a
/// read-modify-write cycle never drops them.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceItem {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standby_type: Option<StandbyType>,
    #[serde(default, rename = "travelVideo1", skip_serializing_if = "Option::is_none")]
    pub travel_video1: Option<String>,
    #[serde(default, rename = "travelVideo2", skip_serializing_if = "Option::is_none")]
    pub travel_video2: Option<String>,
    #[serde(default, rename = "travelVideo3", skip_serializing_if = "Option::is_none")]
    pub travel_video3: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResourceItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Every attachment reference carried by the item, in field order.
    pub fn attachments(&self) -> impl Iterator<Item = &str> {
        [
            &self.video_url,
            &self.icon_url,
            &self.cover_url,
            &self.travel_video1,
            &self.travel_video2,
            &self.travel_video3,
        ]
        .into_iter()
        .filter_map(|field| field.as_deref())
    }
}

/// Category name (`eat`, `gift`, `travel`, `standby`, `moments`, ...) to
/// ordered resource items.
pub type CategoryResources = BTreeMap<String, Vec<ResourceItem>>;

/// The aggregate of one role's resources; at most one per role id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleResourceRecord {
    pub role_id: String,
    pub resources: CategoryResources,
    pub timestamp: i64,
    pub version: String,
}

impl RoleResourceRecord {
    pub fn new(role_id: impl Into<String>, resources: CategoryResources) -> Self {
        Self {
            role_id: role_id.into(),
            resources,
            timestamp: utils::now_millis(),
            version: ROLE_RESOURCES_VERSION.to_string(),
        }
    }
}

/// Arbitrary JSON document stored in the structured `metadata` collection.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub key: String,
    pub category: String,
    pub value: Value,
    pub timestamp: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Create,
    Read,
    Update,
    Delete,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Permission {
    pub id: String,
    pub name: String,
    pub resource: String,
    pub action: PermissionAction,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: String,
    pub status: UserStatus,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FieldChange {
    pub from: Value,
    pub to: Value,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LogItem {
    pub id: String,
    pub ts: String,
    pub actor: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<BTreeMap<String, FieldChange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_data_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_base_image_data_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_tone: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_record_uses_persisted_field_names() {
        let record = NewFile::from_bytes("r1", "eat", "a.png", "image/png", vec![1, 2, 3])
            .with_metadata("resourceId", "res-1")
            .into_record("file_1_abc".into(), 42);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "image");
        assert_eq!(value["roleId"], "r1");
        assert_eq!(value["resourceType"], "eat");
        assert_eq!(value["fileSize"], 3);
        assert_eq!(value["timestamp"], 42);
        assert_eq!(value["data"]["binary"], "AQID");
        assert_eq!(value["metadata"]["resourceId"], "res-1");
    }

    #[test]
    fn legacy_string_payload_parses_as_data_url() {
        let value = json!({
            "id": "file_1_x",
            "type": "image",
            "roleId": "r1",
            "resourceType": "gift",
            "fileName": "g.png",
            "fileSize": 3,
            "data": "data:image/png;base64,AQID",
            "timestamp": 1
        });
        let record: FileRecord = serde_json::from_value(value).unwrap();
        assert!(matches!(record.payload, Payload::DataUrl(_)));
        assert_eq!(record.effective_mime(), "image/png");
        assert_eq!(record.payload.to_bytes().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn binary_payload_converts_to_data_url() {
        let payload = Payload::from_bytes(vec![1, 2, 3]).into_data_url("image/png");
        assert_eq!(payload, Payload::DataUrl("data:image/png;base64,AQID".into()));
        assert_eq!(payload.byte_len(), 3);
    }

    #[test]
    fn resource_item_keeps_unknown_fields() {
        let value = json!({
            "id": "i1",
            "name": "noodles",
            "videoUrl": "file_1_a",
            "travelVideo2": "file_2_b",
            "customFlag": true
        });
        let item: ResourceItem = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(item.attachments().collect::<Vec<_>>(), vec!["file_1_a", "file_2_b"]);
        assert_eq!(serde_json::to_value(&item).unwrap(), value);
    }

    #[test]
    fn new_file_from_data_url_requires_prefix() {
        assert!(NewFile::from_data_url("r1", "eat", "a", "plain").is_err());
        assert!(matches!(
            NewFile::from_data_url("r1", "eat", "a", "data:image/png;base64,@@@@"),
            Err(StorageError::Encoding(ref reason)) if reason == "undecodable payload"
        ));
        let file = NewFile::from_data_url("r1", "eat", "a", "data:video/mp4;base64,AAAA").unwrap();
        assert_eq!(file.kind, FileKind::Video);
        assert_eq!(file.byte_size(), 3);
    }
}
