//! # Key-Value Migration
//!
//! Moves data written by the key-value path into the structured store:
//!
//! ```text
//! admin_role_resources_v1            → roleResources (one record per role)
//! admin_roles_v1, admin_users_v1,
//! admin_action_logs_v1,
//! admin_role_meta_v1                 → metadata (category "migrated")
//! file_*                             → files
//! ```
//!
//! A key-value original is removed only after its structured write
//! succeeded. A record that fails is counted and left in place, so running
//! the migration again after an interruption picks up where it stopped.

use serde::Serialize;
use serde_json::Value;

use crate::constants::{FILE_KEY_PREFIX, MIGRATED_CATEGORY, MIGRATED_COLLECTION_KEYS, ROLE_RESOURCES_KEY};
use crate::errors::StorageResult;
use crate::logging::Logger;
use crate::log_data;
use crate::router::{Backend, HybridRouter, RoleResourceMap};
use crate::validation::RecordValidator;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl MigrationReport {
    fn fail(&mut self, logger: &Logger, what: &str, reason: String) {
        logger.error(
            "Migration step failed",
            log_data!("item" => what, "error" => reason),
        );
        self.failed += 1;
        self.errors.push(format!("{}: {}", what, reason));
    }
}

/// Runs the migration through the router's adapters.
///
/// The caller must have checked that the structured store is available.
pub(crate) async fn migrate(router: &HybridRouter) -> StorageResult<MigrationReport> {
    let logger = Logger::new("migration");
    let mut report = MigrationReport::default();

    migrate_role_resources(router, &logger, &mut report).await?;
    migrate_collections(router, &logger, &mut report).await?;
    migrate_files(router, &logger, &mut report).await?;

    logger.info(
        "Migration finished",
        log_data!("succeeded" => report.succeeded, "failed" => report.failed),
    );
    Ok(report)
}

async fn migrate_role_resources(
    router: &HybridRouter,
    logger: &Logger,
    report: &mut MigrationReport,
) -> StorageResult<()> {
    let kv = router.kv();
    let raw = match kv.get(ROLE_RESOURCES_KEY)? {
        Some(raw) => raw,
        None => return Ok(()),
    };
    let map: RoleResourceMap = match serde_json::from_str(&raw) {
        Ok(map) => map,
        Err(e) => {
            report.fail(logger, ROLE_RESOURCES_KEY, e.to_string());
            return Ok(());
        }
    };

    let mut remaining = RoleResourceMap::new();
    for (role_id, resources) in map {
        match router
            .structured()
            .store_role_resources(&role_id, resources.clone())
            .await
        {
            Ok(()) => report.succeeded += 1,
            Err(e) => {
                report.fail(logger, &format!("roleResources/{}", role_id), e.to_string());
                remaining.insert(role_id, resources);
            }
        }
    }

    if remaining.is_empty() {
        kv.delete(ROLE_RESOURCES_KEY)?;
    } else {
        kv.set_json(ROLE_RESOURCES_KEY, &remaining)?;
    }
    Ok(())
}

async fn migrate_collections(
    router: &HybridRouter,
    logger: &Logger,
    report: &mut MigrationReport,
) -> StorageResult<()> {
    let kv = router.kv();
    for key in MIGRATED_COLLECTION_KEYS {
        let raw = match kv.get(key)? {
            Some(raw) => raw,
            None => continue,
        };
        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                report.fail(logger, key, e.to_string());
                continue;
            }
        };
        match router.structured().put_metadata(key, MIGRATED_CATEGORY, value).await {
            Ok(()) => {
                kv.delete(key)?;
                report.succeeded += 1;
            }
            Err(e) => report.fail(logger, key, e.to_string()),
        }
    }
    Ok(())
}

async fn migrate_files(
    router: &HybridRouter,
    logger: &Logger,
    report: &mut MigrationReport,
) -> StorageResult<()> {
    let kv = router.kv();
    let keys: Vec<String> = kv
        .keys()?
        .into_iter()
        .filter(|key| key.starts_with(FILE_KEY_PREFIX))
        .collect();

    for key in keys {
        let raw = match kv.get(&key)? {
            Some(raw) => raw,
            None => continue,
        };
        let record = match serde_json::from_str::<Value>(&raw)
            .map_err(|e| e.to_string())
            .and_then(|value| RecordValidator::validate_file_value(&value).map_err(|issue| issue.reason))
        {
            Ok(record) => record,
            Err(reason) => {
                report.fail(logger, &key, reason);
                continue;
            }
        };
        match router.structured().put_file_record(&record).await {
            Ok(()) => {
                kv.delete(&key)?;
                router.record_placement(&record.id, Backend::Structured);
                report.succeeded += 1;
            }
            Err(e) => report.fail(logger, &key, e.to_string()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::constants::{METADATA_COLLECTION, ROLES_KEY};
    use crate::database::{MemoryObjectStore, StructuredStore};
    use crate::kv::{KvAdapter, MemoryKeyValueStore};
    use crate::models::{CategoryResources, NewFile, ResourceItem};
    use crate::router::kv_file_key;
    use std::sync::Arc;

    fn router() -> HybridRouter {
        HybridRouter::new(
            StorageConfig::default(),
            KvAdapter::new(Arc::new(MemoryKeyValueStore::new())),
            StructuredStore::new(Arc::new(MemoryObjectStore::new())),
        )
    }

    #[tokio::test]
    async fn migrates_every_kind_of_key_value_data() {
        let router = router();
        let id = router
            .route_write(NewFile::from_bytes("r1", "eat", "a.png", "image/png", vec![1, 2, 3]))
            .await
            .unwrap();
        let mut resources = CategoryResources::new();
        resources.insert("eat".into(), vec![ResourceItem::new("i1", "noodles")]);
        router.store_role_resources("r1", resources.clone()).await.unwrap();
        router.kv().set(ROLES_KEY, r#"[{"id":"r1","name":"Dongdong"}]"#).unwrap();

        let report = router.migrate().await.unwrap();
        assert_eq!(report, MigrationReport { succeeded: 3, failed: 0, errors: vec![] });

        assert!(router.kv().get(&kv_file_key(&id)).unwrap().is_none());
        assert!(router.kv().get(ROLE_RESOURCES_KEY).unwrap().is_none());
        assert!(router.kv().get(ROLES_KEY).unwrap().is_none());
        assert_eq!(router.placement(&id), Some(Backend::Structured));
        assert!(router.structured().get_file(&id).await.unwrap().is_some());
        assert_eq!(router.get_role_resources("r1").await.unwrap(), Some(resources));
        let roles = router.structured().get_metadata(ROLES_KEY).await.unwrap().unwrap();
        assert_eq!(roles.category, MIGRATED_CATEGORY);
        assert_eq!(router.structured().count_of(METADATA_COLLECTION).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn corrupt_entries_stay_in_place() {
        let router = router();
        router.kv().set(ROLES_KEY, "{broken").unwrap();
        router.kv().set("file_bad", r#"{"id":"bad","data":""}"#).unwrap();

        let report = router.migrate().await.unwrap();
        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed, 2);
        assert!(router.kv().get(ROLES_KEY).unwrap().is_some());
        assert!(router.kv().get("file_bad").unwrap().is_some());
    }

    #[tokio::test]
    async fn second_run_finds_nothing() {
        let router = router();
        router.kv().set(ROLES_KEY, "[]").unwrap();
        assert_eq!(router.migrate().await.unwrap().succeeded, 1);
        assert_eq!(router.migrate().await.unwrap(), MigrationReport::default());
    }
}
