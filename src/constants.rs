//! # Application Constants
//!
//! This module defines the storage layout and numeric policy shared by every
//! component of the admin console storage engine. Key names and collection
//! names are persisted in users' browsers, so they must stay stable for
//! migration compatibility.
//!
//! ## Key-Value Keys
//!
//! Keys used in the size-limited key-value store (`localStorage`).
//!
//! ## Structured Store Layout
//!
//! Database name, schema version, collection names and index names used in
//! the structured store (`IndexedDB`).
//!
//! ## Size Policy
//!
//! Default thresholds for quota estimation, routing and chunking.

/// Roles collection (JSON array)
pub const ROLES_KEY: &str = "admin_roles_v1";

/// Users collection (JSON array)
pub const USERS_KEY: &str = "admin_users_v1";

/// Role resources map (JSON object keyed by role id)
pub const ROLE_RESOURCES_KEY: &str = "admin_role_resources_v1";

/// Action log (JSON array, newest first)
pub const ACTION_LOGS_KEY: &str = "admin_action_logs_v1";

/// Per-role presentation metadata (JSON object keyed by role id)
pub const ROLE_META_KEY: &str = "admin_role_meta_v1";

/// Storage configuration overrides
pub const STORAGE_CONFIG_KEY: &str = "admin_storage_config_v1";

/// Prefix of file records written to the key-value store
pub const FILE_KEY_PREFIX: &str = "file_";

/// Marker for temporary key-value entries swept by cleanup
pub const TEMP_KEY_MARKER: &str = "temp_";

/// Key written and removed by the writability probe
pub const PROBE_KEY: &str = "__storage_test__";

/// Collections that migrate into the structured `metadata` collection
pub const MIGRATED_COLLECTION_KEYS: [&str; 4] =
    [ROLES_KEY, USERS_KEY, ACTION_LOGS_KEY, ROLE_META_KEY];

/// Structured store database name
pub const DATABASE_NAME: &str = "DongdongManagementDB";

/// Structured store schema version
pub const SCHEMA_VERSION: u32 = 2;

pub const FILES_COLLECTION: &str = "files";
pub const ROLE_RESOURCES_COLLECTION: &str = "roleResources";
pub const METADATA_COLLECTION: &str = "metadata";
pub const FILE_METADATA_COLLECTION: &str = "fileMetadata";
pub const FILE_CHUNKS_COLLECTION: &str = "fileChunks";

/// Category assigned to collections copied by migration
pub const MIGRATED_CATEGORY: &str = "migrated";

/// Version tag written on role resource records
pub const ROLE_RESOURCES_VERSION: &str = "1.0";

/// Version tag written on backup documents
pub const BACKUP_VERSION: &str = "1.0.0";

/// Assumed browser key-value ceiling (5MB); heuristic, never queried
pub const DEFAULT_KV_TOTAL: usize = 5 * 1024 * 1024;

/// Key-value budget reserved for the application (2MB)
pub const DEFAULT_KV_CEILING: usize = 2 * 1024 * 1024;

/// Payloads at or above this size always go to the structured store (1MB)
pub const DEFAULT_AUTO_SWITCH_THRESHOLD: usize = 1024 * 1024;

/// Minimum key-value free space for `auto` mode to prefer it (512KB)
pub const DEFAULT_KV_FREE_FLOOR: usize = 512 * 1024;

/// Chunk size for the chunked block store (1MB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Age after which the optional sweep removes structured file records (30 days)
pub const DEFAULT_MAX_FILE_AGE_DAYS: i64 = 30;

/// Base64 expansion applied by the quota estimator
pub const BASE64_EXPANSION: f64 = 1.33;

/// Maximum number of action log entries retained
pub const MAX_ACTION_LOGS: usize = 500;

/// Prefix of object URLs handed out by the preview registry
pub const OBJECT_URL_PREFIX: &str = "blob:admin-console/";
