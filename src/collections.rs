//! # Admin Collections
//!
//! Typed access to the console's small JSON collections: roles, users, the
//! action log and per-role presentation metadata.
//!
//! ## Storage
//!
//! Each collection is one JSON document under its key-value key
//! (`admin_roles_v1`, `admin_users_v1`, `admin_action_logs_v1`,
//! `admin_role_meta_v1`). After a migration, or when the key-value store is
//! full, the document lives in the structured `metadata` collection under the
//! same key instead.
//!
//! - **Reads**: key-value first, then the `metadata` copy
//! - **Writes**: key-value; on quota the document goes to `metadata` and the
//!   key-value copy is removed, so a later read cannot see stale data
//!
//! ## Action Log
//!
//! Entries are kept newest first and capped at 500.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::constants::{
    ACTION_LOGS_KEY, MAX_ACTION_LOGS, MIGRATED_CATEGORY, ROLES_KEY, ROLE_META_KEY, USERS_KEY,
};
use crate::errors::{IntegrityIssue, StorageError, StorageResult};
use crate::logging::Logger;
use crate::log_data;
use crate::models::{FieldChange, LogItem, Role, RoleMeta, User};
use crate::router::{HybridRouter, RoleResourceMap};
use crate::utils::generate_log_id;

/// Actor recorded on log entries; the console has a single operator.
const DEFAULT_ACTOR: &str = "admin";

/// Role id to presentation metadata, stored under `admin_role_meta_v1`.
pub type RoleMetaMap = BTreeMap<String, RoleMeta>;

/// Input for a new action log entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogEntry {
    pub action: String,
    pub detail: Option<String>,
    pub target: Option<String>,
    pub changes: Option<BTreeMap<String, FieldChange>>,
    pub metadata: Option<Map<String, Value>>,
}

impl LogEntry {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Self::default()
        }
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Attaches field changes; an empty diff is not recorded.
    pub fn changes(mut self, changes: BTreeMap<String, FieldChange>) -> Self {
        if !changes.is_empty() {
            self.changes = Some(changes);
        }
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Entry for an operation on one resource item, detailed as
    /// `role · category · item`.
    pub fn resource(action: impl Into<String>, role_name: &str, category: &str, item_name: &str) -> Self {
        Self::new(action).detail(format!("{} · {} · {}", role_name, category, item_name))
    }
}

/// Field-by-field diff of two JSON objects, restricted to `fields`.
///
/// Only fields whose values differ are returned; a field missing on one
/// side is compared as `null`.
///
/// # Example
///
/// ```rust
/// use admin_console_storage::collections::generate_changes;
/// use serde_json::json;
///
/// let changes = generate_changes(
///     &json!({"name": "Dongdong", "status": "active"}),
///     &json!({"name": "Dongdong", "status": "inactive"}),
///     &["name", "status"],
/// );
/// assert_eq!(changes.len(), 1);
/// assert_eq!(changes["status"].to, json!("inactive"));
/// ```
pub fn generate_changes(old: &Value, new: &Value, fields: &[&str]) -> BTreeMap<String, FieldChange> {
    fields
        .iter()
        .filter_map(|field| {
            let from = old.get(*field).cloned().unwrap_or(Value::Null);
            let to = new.get(*field).cloned().unwrap_or(Value::Null);
            (from != to).then(|| (field.to_string(), FieldChange { from, to }))
        })
        .collect()
}

/// The roles seeded when none are stored.
pub fn default_roles() -> Vec<Role> {
    let now = Utc::now().to_rfc3339();
    let role = |id: &str, name: &str, description: &str| Role {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        permissions: Vec::new(),
        created_at: now.clone(),
        updated_at: now.clone(),
        extra: Map::new(),
    };
    vec![
        role("r-admin", "Administrator", "Full system access"),
        role("r-editor", "Editor", "Content editing access"),
    ]
}

/// Typed roles, users, action log and role metadata.
#[derive(Clone)]
pub struct AdminCollections {
    router: Arc<HybridRouter>,
    logger: Logger,
}

impl AdminCollections {
    pub fn new(router: Arc<HybridRouter>) -> Self {
        Self {
            router,
            logger: Logger::new("collections"),
        }
    }

    /// Reads a collection document: key-value first, then `metadata`.
    async fn read<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        let status = self.router.init().await;
        if let Some(value) = self.router.kv().get_json(key)? {
            return Ok(Some(value));
        }
        if !status.structured_available {
            return Ok(None);
        }
        match self.router.structured().get_metadata(key).await? {
            None => Ok(None),
            Some(record) => serde_json::from_value(record.value).map(Some).map_err(|e| {
                StorageError::Integrity(IntegrityIssue::new("metadata", key, e.to_string()))
            }),
        }
    }

    /// Writes a collection document, overflowing into `metadata` on quota.
    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let status = self.router.init().await;
        match self.router.kv().set_json(key, value) {
            Ok(()) => {
                if status.structured_available {
                    if let Err(e) = self.router.structured().delete_metadata(key).await {
                        self.logger.warn(
                            "Failed to prune metadata copy",
                            log_data!("key" => key, "error" => e.to_string()),
                        );
                    }
                }
                Ok(())
            }
            Err(e) if e.is_quota() && status.structured_available => {
                self.logger.warn(
                    "Key-value store full, storing collection in metadata",
                    log_data!("key" => key),
                );
                self.router
                    .structured()
                    .put_metadata(key, MIGRATED_CATEGORY, serde_json::to_value(value)?)
                    .await?;
                self.router.kv().delete(key)
            }
            Err(e) => Err(e),
        }
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let status = self.router.init().await;
        self.router.kv().delete(key)?;
        if status.structured_available {
            self.router.structured().delete_metadata(key).await?;
        }
        Ok(())
    }

    /// Stored roles, or the default roles when none are stored.
    pub async fn roles(&self) -> StorageResult<Vec<Role>> {
        Ok(self.read(ROLES_KEY).await?.unwrap_or_else(default_roles))
    }

    pub async fn save_roles(&self, roles: &[Role]) -> StorageResult<()> {
        self.write(ROLES_KEY, roles).await
    }

    pub async fn users(&self) -> StorageResult<Vec<User>> {
        Ok(self.read(USERS_KEY).await?.unwrap_or_default())
    }

    pub async fn save_users(&self, users: &[User]) -> StorageResult<()> {
        self.write(USERS_KEY, users).await
    }

    /// Action log, newest first.
    pub async fn logs(&self) -> StorageResult<Vec<LogItem>> {
        Ok(self.read(ACTION_LOGS_KEY).await?.unwrap_or_default())
    }

    /// Replaces the whole log, keeping at most the 500 first entries.
    pub async fn save_logs(&self, mut logs: Vec<LogItem>) -> StorageResult<()> {
        logs.truncate(MAX_ACTION_LOGS);
        self.write(ACTION_LOGS_KEY, &logs).await
    }

    /// Prepends an entry to the action log.
    ///
    /// # Returns
    ///
    /// The stored entry, with its generated id and timestamp.
    pub async fn append_log(&self, entry: LogEntry) -> StorageResult<LogItem> {
        let item = LogItem {
            id: generate_log_id(),
            ts: Utc::now().to_rfc3339(),
            actor: DEFAULT_ACTOR.to_string(),
            action: entry.action,
            detail: entry.detail,
            target: entry.target,
            changes: entry.changes,
            metadata: entry.metadata,
        };
        let mut logs = self.logs().await?;
        logs.insert(0, item.clone());
        self.save_logs(logs).await?;
        Ok(item)
    }

    pub async fn clear_logs(&self) -> StorageResult<()> {
        self.remove(ACTION_LOGS_KEY).await
    }

    pub async fn role_meta(&self) -> StorageResult<RoleMetaMap> {
        Ok(self.read(ROLE_META_KEY).await?.unwrap_or_default())
    }

    pub async fn save_role_meta(&self, meta: &RoleMetaMap) -> StorageResult<()> {
        self.write(ROLE_META_KEY, meta).await
    }

    /// Removes every collection and every role's resources.
    pub async fn clear_all(&self) -> StorageResult<()> {
        for key in [ROLES_KEY, USERS_KEY, ACTION_LOGS_KEY, ROLE_META_KEY] {
            self.remove(key).await?;
        }
        self.router
            .replace_all_role_resources(RoleResourceMap::new())
            .await?;
        self.logger.info("All admin data cleared", None);
        Ok(())
    }
}
