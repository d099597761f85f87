//! # Browser Key-Value Backend
//!
//! [`KeyValueBackend`] over `window.localStorage`. Only compiled for
//! `wasm32`; native builds and tests use
//! [`MemoryKeyValueStore`](crate::kv::MemoryKeyValueStore).
//!
//! The storage handle is looked up on every call rather than held, which
//! keeps the backend `Send + Sync` and copes with storage being disabled
//! after start-up (private browsing, site data cleared).

use wasm_bindgen::{JsCast, JsValue};
use web_sys::{DomException, Storage};

use crate::errors::BackendError;
use crate::kv::KeyValueBackend;

/// DOM exception names browsers use for a full `localStorage`.
const QUOTA_EXCEPTION_NAMES: [&str; 2] = ["QuotaExceededError", "NS_ERROR_DOM_QUOTA_REACHED"];

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStorageBackend;

impl LocalStorageBackend {
    pub fn new() -> Self {
        Self
    }

    /// Whether `localStorage` can be reached at all.
    pub fn is_available() -> bool {
        storage().is_ok()
    }
}

fn storage() -> Result<Storage, BackendError> {
    web_sys::window()
        .ok_or_else(|| BackendError::Unavailable("no window".to_string()))?
        .local_storage()
        .map_err(|e| BackendError::Unavailable(describe(&e)))?
        .ok_or_else(|| BackendError::Unavailable("localStorage disabled".to_string()))
}

fn describe(error: &JsValue) -> String {
    match error.dyn_ref::<DomException>() {
        Some(exception) => format!("{}: {}", exception.name(), exception.message()),
        None => error.as_string().unwrap_or_else(|| format!("{:?}", error)),
    }
}

fn translate(error: JsValue) -> BackendError {
    let is_quota = error
        .dyn_ref::<DomException>()
        .map(|exception| QUOTA_EXCEPTION_NAMES.contains(&exception.name().as_str()))
        .unwrap_or(false);
    if is_quota {
        BackendError::QuotaExceeded
    } else {
        BackendError::Failure(describe(&error))
    }
}

impl KeyValueBackend for LocalStorageBackend {
    fn keys(&self) -> Result<Vec<String>, BackendError> {
        let storage = storage()?;
        let length = storage.length().map_err(translate)?;
        let mut keys = Vec::with_capacity(length as usize);
        for index in 0..length {
            if let Some(key) = storage.key(index).map_err(translate)? {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, BackendError> {
        storage()?.get_item(key).map_err(translate)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), BackendError> {
        storage()?.set_item(key, value).map_err(translate)
    }

    fn remove_item(&self, key: &str) -> Result<(), BackendError> {
        storage()?.remove_item(key).map_err(translate)
    }
}
