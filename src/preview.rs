//! # Preview URLs
//!
//! Displaying a stored file needs either its data URL or a short-lived
//! object URL pointing at its bytes. Object URLs hold memory until they are
//! revoked, so every one handed out here is tied to an [`ObjectUrl`] guard
//! that revokes it when dropped.
//!
//! ## Resolution
//!
//! [`resolve_preview`] turns a resource reference into something renderable:
//!
//! - a reference that already is a `data:` URL is used as is
//! - a file whose payload is a data URL yields [`Preview::DataUrl`]
//! - a file holding raw bytes yields [`Preview::Object`]
//! - a missing or corrupt file yields [`Preview::Placeholder`] with a short
//!   diagnostic instead of an error

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use crate::constants::OBJECT_URL_PREFIX;
use crate::logging::Logger;
use crate::log_data;
use crate::models::Payload;
use crate::router::HybridRouter;
use crate::utils::has_data_url_prefix;

#[derive(Debug, Clone, PartialEq)]
struct ObjectEntry {
    mime_type: String,
    bytes: Vec<u8>,
}

type Entries = RwLock<HashMap<String, ObjectEntry>>;

/// Allocates and revokes `blob:` URLs.
#[derive(Clone)]
pub struct PreviewRegistry {
    entries: Arc<Entries>,
    logger: Logger,
}

impl Default for PreviewRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            logger: Logger::new("preview"),
        }
    }

    /// Allocates an object URL for `bytes`.
    ///
    /// # Returns
    ///
    /// A guard that revokes the URL when dropped.
    pub fn create(&self, bytes: Vec<u8>, mime_type: &str) -> ObjectUrl {
        let url = format!("{}{}", OBJECT_URL_PREFIX, uuid::Uuid::new_v4());
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(
                url.clone(),
                ObjectEntry {
                    mime_type: mime_type.to_string(),
                    bytes,
                },
            );
        }
        self.logger.debug("Object URL created", log_data!("url" => &url));
        ObjectUrl {
            url,
            entries: Arc::downgrade(&self.entries),
        }
    }

    /// Revokes `url`. Revoking an unknown or already revoked URL is a no-op.
    pub fn revoke(&self, url: &str) -> bool {
        revoke_entry(&self.entries, url)
    }

    /// MIME type and bytes behind a live URL.
    pub fn fetch(&self, url: &str) -> Option<(String, Vec<u8>)> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(url).cloned())
            .map(|entry| (entry.mime_type, entry.bytes))
    }

    /// Number of URLs allocated and not yet revoked.
    pub fn live_count(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }
}

fn revoke_entry(entries: &Entries, url: &str) -> bool {
    entries
        .write()
        .map(|mut entries| entries.remove(url).is_some())
        .unwrap_or(false)
}

/// A live object URL; revoked on drop.
pub struct ObjectUrl {
    url: String,
    entries: Weak<Entries>,
}

impl ObjectUrl {
    pub fn as_str(&self) -> &str {
        &self.url
    }
}

impl fmt::Debug for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectUrl").field(&self.url).finish()
    }
}

impl fmt::Display for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

impl Drop for ObjectUrl {
    fn drop(&mut self) {
        if let Some(entries) = self.entries.upgrade() {
            revoke_entry(&entries, &self.url);
        }
    }
}

/// Something the UI can render for a resource.
#[derive(Debug)]
pub enum Preview {
    DataUrl(String),
    Object(ObjectUrl),
    Placeholder { diagnostic: String },
}

impl Preview {
    /// URL to render, `None` for a placeholder.
    pub fn url(&self) -> Option<&str> {
        match self {
            Preview::DataUrl(url) => Some(url),
            Preview::Object(url) => Some(url.as_str()),
            Preview::Placeholder { .. } => None,
        }
    }
}

/// Resolves a resource reference (file id or data URL) into a preview.
///
/// Never fails: storage errors become a placeholder carrying
/// [`StorageError::diagnostic`](crate::errors::StorageError::diagnostic).
pub async fn resolve_preview(registry: &PreviewRegistry, router: &HybridRouter, reference: &str) -> Preview {
    if has_data_url_prefix(reference) {
        return Preview::DataUrl(reference.to_string());
    }
    match router.route_read(reference).await {
        Ok(Some(record)) => {
            let mime_type = record.effective_mime();
            match record.payload {
                Payload::DataUrl(url) => Preview::DataUrl(url),
                Payload::Binary { binary } => Preview::Object(registry.create(binary, &mime_type)),
            }
        }
        Ok(None) => Preview::Placeholder {
            diagnostic: "file not found".to_string(),
        },
        Err(e) => {
            registry.logger.warn(
                "Preview unavailable",
                log_data!("reference" => reference, "error" => e.to_string()),
            );
            Preview::Placeholder {
                diagnostic: e.diagnostic(),
            }
        }
    }
}
