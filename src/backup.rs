//! # Backup Export / Import
//!
//! The settings screen exports every admin collection as one JSON document
//! and can restore it later:
//!
//! ```json
//! {
//!   "roles": [...],
//!   "roleResources": { "<roleId>": { "<category>": [...] } },
//!   "users": [...],
//!   "logs": [...],
//!   "roleMeta": { "<roleId>": {...} },
//!   "exportTime": "2026-01-01T00:00:00+00:00",
//!   "version": "1.0.0"
//! }
//! ```
//!
//! Import overwrites each collection present in the document wholesale.
//! Collections absent from the document are left untouched. The document is
//! parsed completely before anything is written.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::collections::{AdminCollections, RoleMetaMap};
use crate::constants::BACKUP_VERSION;
use crate::errors::{StorageError, StorageResult};
use crate::logging::Logger;
use crate::log_data;
use crate::models::{LogItem, Role, User};
use crate::router::{HybridRouter, RoleResourceMap};

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<Role>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_resources: Option<RoleResourceMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<User>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<LogItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_meta: Option<RoleMetaMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Which collections an import overwrote.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub roles: bool,
    pub role_resources: bool,
    pub users: bool,
    pub logs: bool,
    pub role_meta: bool,
}

#[derive(Clone)]
pub struct BackupService {
    router: Arc<HybridRouter>,
    collections: AdminCollections,
    logger: Logger,
}

impl BackupService {
    pub fn new(router: Arc<HybridRouter>, collections: AdminCollections) -> Self {
        Self {
            router,
            collections,
            logger: Logger::new("backup"),
        }
    }

    /// Collects every admin collection into a backup document.
    pub async fn snapshot(&self) -> StorageResult<BackupDocument> {
        Ok(BackupDocument {
            roles: Some(self.collections.roles().await?),
            role_resources: Some(self.router.all_role_resources().await?),
            users: Some(self.collections.users().await?),
            logs: Some(self.collections.logs().await?),
            role_meta: Some(self.collections.role_meta().await?),
            export_time: Some(Utc::now().to_rfc3339()),
            version: Some(BACKUP_VERSION.to_string()),
        })
    }

    /// Exports every admin collection as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Fails if any collection cannot be read.
    pub async fn export(&self) -> StorageResult<String> {
        let document = self.snapshot().await?;
        let json = serde_json::to_string_pretty(&document)?;
        self.logger.info("Backup exported", log_data!("bytes" => json.len()));
        Ok(json)
    }

    /// Restores collections from a backup document.
    ///
    /// # Arguments
    ///
    /// * `json` - A document previously produced by [`BackupService::export`]
    ///
    /// # Returns
    ///
    /// Which collections were overwritten.
    ///
    /// # Errors
    ///
    /// * `StorageError::InvalidInput` - The document is not valid backup JSON;
    ///   nothing has been written
    /// * Any storage error from the individual writes
    pub async fn import(&self, json: &str) -> StorageResult<ImportSummary> {
        let document: BackupDocument = serde_json::from_str(json)
            .map_err(|e| StorageError::InvalidInput(format!("invalid backup document: {}", e)))?;

        let mut summary = ImportSummary::default();
        if let Some(roles) = &document.roles {
            self.collections.save_roles(roles).await?;
            summary.roles = true;
        }
        if let Some(map) = document.role_resources {
            self.router.replace_all_role_resources(map).await?;
            summary.role_resources = true;
        }
        if let Some(users) = &document.users {
            self.collections.save_users(users).await?;
            summary.users = true;
        }
        if let Some(logs) = document.logs {
            self.collections.save_logs(logs).await?;
            summary.logs = true;
        }
        if let Some(meta) = &document.role_meta {
            self.collections.save_role_meta(meta).await?;
            summary.role_meta = true;
        }

        self.logger.info(
            "Backup imported",
            log_data!(
                "version" => document.version.unwrap_or_default(),
                "summary" => &summary
            ),
        );
        Ok(summary)
    }
}
