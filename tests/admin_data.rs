//! Admin collections, backup, configuration and previews through a context.

mod common;

use admin_console_storage::collections::{generate_changes, LogEntry};
use admin_console_storage::config::{StorageConfig, StorageMode};
use admin_console_storage::constants::{MAX_ACTION_LOGS, STORAGE_CONFIG_KEY};
use admin_console_storage::database::MemoryObjectStore;
use admin_console_storage::errors::StorageError;
use admin_console_storage::kv::{KeyValueBackend, MemoryKeyValueStore};
use admin_console_storage::models::{CategoryResources, NewFile, ResourceItem};
use admin_console_storage::preview::Preview;
use admin_console_storage::StorageContext;
use common::png_bytes;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn backup_round_trip_overwrites_collections() {
    let source = StorageContext::in_memory();
    let mut roles = source.collections().roles().await.unwrap();
    roles[0].name = "Owner".to_string();
    source.collections().save_roles(&roles).await.unwrap();
    let mut resources = CategoryResources::new();
    resources.insert("eat".into(), vec![ResourceItem::new("i1", "dumplings")]);
    source
        .router()
        .store_role_resources("r-admin", resources.clone())
        .await
        .unwrap();
    source
        .collections()
        .append_log(LogEntry::new("role.update").target("r-admin"))
        .await
        .unwrap();
    let exported = source.backup().export().await.unwrap();

    let target = StorageContext::in_memory();
    target
        .collections()
        .append_log(LogEntry::new("stale"))
        .await
        .unwrap();
    target
        .router()
        .store_role_resources("r-stale", CategoryResources::new())
        .await
        .unwrap();
    target.backup().import(&exported).await.unwrap();

    assert_eq!(target.collections().roles().await.unwrap()[0].name, "Owner");
    let logs = target.collections().logs().await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, "role.update");
    let all = target.router().all_role_resources().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all["r-admin"], resources);
}

#[tokio::test]
async fn rejected_import_leaves_data_alone() {
    let storage = StorageContext::in_memory();
    storage.collections().append_log(LogEntry::new("kept")).await.unwrap();
    let err = storage.backup().import("not json").await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput(_)));
    assert_eq!(storage.collections().logs().await.unwrap().len(), 1);
}

#[tokio::test]
async fn action_log_is_capped_newest_first() {
    let storage = StorageContext::in_memory();
    for i in 0..MAX_ACTION_LOGS + 5 {
        storage
            .collections()
            .append_log(LogEntry::new(format!("edit-{}", i)))
            .await
            .unwrap();
    }
    let changes = generate_changes(&json!({"name": "a"}), &json!({"name": "b"}), &["name"]);
    let newest = storage
        .collections()
        .append_log(LogEntry::new("rename").changes(changes))
        .await
        .unwrap();

    let logs = storage.collections().logs().await.unwrap();
    assert_eq!(logs.len(), MAX_ACTION_LOGS);
    assert_eq!(logs[0], newest);
    assert_eq!(logs[1].action, format!("edit-{}", MAX_ACTION_LOGS + 4));
}

#[tokio::test]
async fn config_loads_with_default_fallback() {
    let kv: Arc<dyn KeyValueBackend> = Arc::new(MemoryKeyValueStore::new());
    kv.set_item(STORAGE_CONFIG_KEY, r#"{"mode": "structured"}"#).unwrap();
    let storage = StorageContext::new(kv.clone(), Arc::new(MemoryObjectStore::new())).unwrap();
    assert_eq!(storage.config().mode, StorageMode::Structured);
    assert_eq!(storage.config().chunk_size, StorageConfig::default().chunk_size);

    kv.set_item(STORAGE_CONFIG_KEY, r#"{"chunkSize": 0}"#).unwrap();
    let storage = StorageContext::new(kv.clone(), Arc::new(MemoryObjectStore::new())).unwrap();
    assert_eq!(storage.config(), &StorageConfig::default());

    let invalid = StorageConfig {
        chunk_size: 0,
        ..StorageConfig::default()
    };
    assert!(storage.save_config(&invalid).is_err());
}

#[tokio::test]
async fn previews_are_revoked_on_drop() {
    let storage = StorageContext::with_config(
        StorageConfig {
            mode: StorageMode::Structured,
            ..StorageConfig::default()
        },
        Arc::new(MemoryKeyValueStore::new()),
        Arc::new(MemoryObjectStore::new()),
    );
    let id = storage
        .router()
        .route_write(NewFile::from_bytes("r1", "eat", "a.png", "image/png", png_bytes(64)))
        .await
        .unwrap();

    {
        let first = storage.preview(&id).await;
        let second = storage.preview(&id).await;
        assert!(matches!(first, Preview::Object(_)));
        assert_ne!(first.url(), second.url());
        assert_eq!(storage.previews().live_count(), 2);
    }
    assert_eq!(storage.previews().live_count(), 0);

    let missing = storage.preview("file_missing").await;
    assert!(missing.url().is_none());
}
