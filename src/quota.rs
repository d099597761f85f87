//! # Quota Estimator
//!
//! Estimates used and available space in the key-value store and decides
//! whether a write would exceed it.
//!
//! The estimate is a heuristic: `total` is an assumed ceiling (the browser
//! does not report a per-origin `localStorage` quota) and `used` counts
//! UTF-16 code units of every key and value, not encoded bytes. Both
//! backends shipped with this crate account for space the same way, so the
//! estimate and the actual refusal agree.

use serde::Serialize;
use std::sync::Arc;

use crate::constants::PROBE_KEY;
use crate::errors::BackendError;
use crate::kv::KeyValueBackend;
use crate::logging::Logger;
use crate::log_data;
use crate::utils::{estimate_base64_size, utf16_len};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaEstimate {
    pub used: usize,
    pub available: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySize {
    pub key: String,
    pub size: usize,
}

/// Usage bands reported to the settings screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaWarning {
    /// More than 70% used
    Elevated,
    /// More than 80% used
    Low,
    /// More than 90% used
    Critical,
}

#[derive(Clone)]
pub struct QuotaEstimator {
    backend: Arc<dyn KeyValueBackend>,
    total: usize,
    logger: Logger,
}

impl QuotaEstimator {
    /// Creates an estimator assuming `total` code units of capacity.
    pub fn new(backend: Arc<dyn KeyValueBackend>, total: usize) -> Self {
        Self {
            backend,
            total,
            logger: Logger::new("quota"),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    fn entry_sizes(&self) -> Result<Vec<EntrySize>, BackendError> {
        let mut sizes = Vec::new();
        for key in self.backend.keys()? {
            if let Some(value) = self.backend.get_item(&key)? {
                sizes.push(EntrySize {
                    size: utf16_len(&key) + utf16_len(&value),
                    key,
                });
            }
        }
        Ok(sizes)
    }

    /// Read-only usage estimate.
    ///
    /// If the store cannot be enumerated, `available` is reported as zero so
    /// callers refuse the write instead of failing halfway through a save.
    pub fn estimate_usage(&self) -> QuotaEstimate {
        match self.entry_sizes() {
            Ok(sizes) => {
                let used = sizes.iter().map(|entry| entry.size).sum::<usize>();
                QuotaEstimate {
                    used,
                    available: self.total.saturating_sub(used),
                    total: self.total,
                }
            }
            Err(e) => {
                self.logger.error(
                    "Failed to estimate key-value usage",
                    log_data!("error" => e.to_string()),
                );
                QuotaEstimate {
                    used: 0,
                    available: 0,
                    total: self.total,
                }
            }
        }
    }

    /// Whether storing `byte_size` raw bytes (base64-expanded) would exceed
    /// the available space.
    pub fn would_exceed(&self, byte_size: usize) -> bool {
        estimate_base64_size(byte_size) > self.estimate_usage().available
    }

    /// Writes and removes a small probe entry to confirm the store accepts
    /// writes. The probe key is removed whether or not the write succeeded.
    pub fn probe_writable(&self) -> bool {
        let probe = "x".repeat(1024);
        let written = self.backend.set_item(PROBE_KEY, &probe).is_ok();
        if let Err(e) = self.backend.remove_item(PROBE_KEY) {
            self.logger.warn(
                "Failed to remove probe key",
                log_data!("error" => e.to_string()),
            );
        }
        written
    }

    /// The `limit` largest entries, biggest first.
    pub fn largest_entries(&self, limit: usize) -> Vec<EntrySize> {
        let mut sizes = self.entry_sizes().unwrap_or_default();
        sizes.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.key.cmp(&b.key)));
        sizes.truncate(limit);
        sizes
    }

    pub fn warning_level(&self) -> Option<QuotaWarning> {
        if self.total == 0 {
            return None;
        }
        let estimate = self.estimate_usage();
        let percent = estimate.used as f64 / self.total as f64 * 100.0;
        if percent > 90.0 {
            Some(QuotaWarning::Critical)
        } else if percent > 80.0 {
            Some(QuotaWarning::Low)
        } else if percent > 70.0 {
            Some(QuotaWarning::Elevated)
        } else {
            None
        }
    }

    /// Human-readable cleanup suggestions for the settings screen.
    pub fn recommendations(&self) -> Vec<String> {
        let sizes = match self.entry_sizes() {
            Ok(sizes) => sizes,
            Err(_) => return vec!["Unable to read key-value storage statistics".to_string()],
        };
        let used: usize = sizes.iter().map(|entry| entry.size).sum();
        let mut recommendations = Vec::new();

        if used as f64 > self.total as f64 * 0.8 {
            recommendations.push(
                "Key-value storage is close to its limit; remove unneeded data or migrate to the structured store"
                    .to_string(),
            );
        }
        if let Some(largest) = sizes.iter().max_by_key(|entry| entry.size) {
            if largest.size > 1024 * 1024 {
                recommendations.push(format!(
                    "Large key-value entry `{}` ({} KB); check whether it is still needed",
                    largest.key,
                    largest.size / 1024
                ));
            }
        }
        if sizes
            .iter()
            .any(|entry| entry.key.contains("role_resources") && entry.size > 100 * 1024)
        {
            recommendations.push(
                "Role resources hold large inline base64 data; migrate them to the structured store"
                    .to_string(),
            );
        }
        recommendations
    }
}
