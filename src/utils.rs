//! # Utility Functions
//!
//! This module provides helpers shared by the storage components: record
//! identifiers, data-URL encoding and decoding, content categorization,
//! size accounting and checksums.
//!
//! ## Core Utilities
//!
//! - **Identifiers**: `{prefix}_{timestamp}_{random}` ids for stored records
//! - **Data URLs**: `data:<mime>;base64,<payload>` encoding and parsing
//! - **Size Accounting**: UTF-16 code-unit lengths, matching how the browser
//!   key-value store measures strings
//! - **Checksums**: `sha256-<hex>` digests for chunked payload verification
//!
//! ## Example Usage
//!
//! ```rust
//! use admin_console_storage::utils::{encode_data_url, decode_data_url};
//!
//! let url = encode_data_url("image/png", &[1, 2, 3]);
//! assert!(url.starts_with("data:image/png;base64,"));
//! let (mime, bytes) = decode_data_url(&url).unwrap();
//! assert_eq!(mime, "image/png");
//! assert_eq!(bytes, vec![1, 2, 3]);
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::{StorageError, StorageResult};
use crate::models::FileKind;

/// Generates a record identifier of the form `{prefix}_{timestamp}_{random}`.
///
/// The timestamp is UTC milliseconds since epoch, so ids sort roughly by
/// creation time; the random part is nine characters taken from a UUID v4.
///
/// # Example
///
/// ```rust
/// let id = admin_console_storage::utils::generate_record_id("file");
/// assert!(id.starts_with("file_"));
/// assert_eq!(id.split('_').count(), 3);
/// ```
pub fn generate_record_id(prefix: &str) -> String {
    let random: String = Uuid::new_v4().simple().to_string().chars().take(9).collect();
    format!("{}_{}_{}", prefix, Utc::now().timestamp_millis(), random)
}

/// Generates an action log identifier (`log-{timestamp}-{random}`).
pub fn generate_log_id() -> String {
    let random: String = Uuid::new_v4().simple().to_string().chars().take(6).collect();
    format!("log-{}-{}", Utc::now().timestamp_millis(), random)
}

/// Current time as UTC milliseconds since epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Length of a string in UTF-16 code units.
///
/// The browser key-value store counts string length this way, so quota
/// accounting uses it instead of the UTF-8 byte length.
pub fn utf16_len(value: &str) -> usize {
    value.encode_utf16().count()
}

/// Size of a raw payload once base64-encoded, as estimated by the quota
/// estimator (rounded up).
pub fn estimate_base64_size(byte_size: usize) -> usize {
    (byte_size as f64 * crate::constants::BASE64_EXPANSION).ceil() as usize
}

pub fn encode_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_base64(encoded: &str) -> StorageResult<Vec<u8>> {
    BASE64
        .decode(encoded)
        .map_err(|e| StorageError::Encoding(format!("invalid base64: {}", e)))
}

/// Encodes bytes as a `data:<mime>;base64,` URL.
pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    let mime = if mime_type.trim().is_empty() {
        "application/octet-stream"
    } else {
        mime_type
    };
    format!("data:{};base64,{}", mime, encode_base64(bytes))
}

/// Splits a data URL into its MIME type and base64 body without decoding.
///
/// Returns `None` when the string lacks the `data:` scheme or the
/// `;base64,` marker.
pub fn split_data_url(data_url: &str) -> Option<(&str, &str)> {
    let rest = data_url.strip_prefix("data:")?;
    let (header, body) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    Some((mime, body))
}

/// Checks that a string carries a usable data-URL prefix.
pub fn has_data_url_prefix(value: &str) -> bool {
    split_data_url(value).is_some()
}

/// Decodes a data URL into its MIME type and raw bytes.
pub fn decode_data_url(data_url: &str) -> StorageResult<(String, Vec<u8>)> {
    let (mime, body) = split_data_url(data_url)
        .ok_or_else(|| StorageError::Encoding("missing data URL prefix".to_string()))?;
    Ok((mime.to_string(), decode_base64(body)?))
}

/// Number of raw bytes a base64 body decodes to, without decoding it.
pub fn decoded_len(base64_body: &str) -> usize {
    let trimmed = base64_body.trim_end();
    let padding = trimmed.chars().rev().take_while(|c| *c == '=').count();
    (trimmed.len() / 4 * 3).saturating_sub(padding)
}

/// Categorizes a MIME type into the file kinds stored by the console.
///
/// - `image/*` → image
/// - `video/*` → video
/// - everything else → document
pub fn categorize_content_type(content_type: &str) -> FileKind {
    let content_type = content_type.to_lowercase();

    if content_type.starts_with("image/") {
        FileKind::Image
    } else if content_type.starts_with("video/") {
        FileKind::Video
    } else {
        FileKind::Document
    }
}

/// Sanitizes a filename before it is recorded.
///
/// Path separators and characters that are invalid on common filesystems
/// are removed; the result is never empty.
pub fn sanitize_filename(filename: &str) -> String {
    let safe_chars: String = filename
        .trim()
        .chars()
        .filter(|c| !"/\\:*?\"<>|".contains(*c))
        .take(255)
        .collect();

    if safe_chars.is_empty() {
        "unknown".to_string()
    } else {
        safe_chars
    }
}

/// SHA-256 digest formatted as `sha256-<hex>`.
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256-{}", hex::encode(hasher.finalize()))
}

/// Serde adapter storing byte buffers as base64 strings inside JSON records.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_ids_have_three_parts_and_differ() {
        let a = generate_record_id("file");
        let b = generate_record_id("file");
        assert_ne!(a, b);
        let parts: Vec<&str> = a.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "file");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
    }

    #[test]
    fn data_url_decodes_back_to_bytes() {
        let url = encode_data_url("video/mp4", b"hello world");
        let (mime, bytes) = decode_data_url(&url).unwrap();
        assert_eq!(mime, "video/mp4");
        assert_eq!(bytes, b"hello world");
    }

    #[test]
    fn data_url_prefix_is_required() {
        assert!(!has_data_url_prefix("aGVsbG8="));
        assert!(!has_data_url_prefix("data:image/png,raw"));
        assert!(has_data_url_prefix("data:image/png;base64,aGVsbG8="));
        assert!(decode_data_url("nope").is_err());
    }

    #[test]
    fn empty_mime_falls_back_to_octet_stream() {
        assert!(encode_data_url("", b"x").starts_with("data:application/octet-stream;base64,"));
    }

    #[test]
    fn decoded_len_accounts_for_padding() {
        assert_eq!(decoded_len(&encode_base64(b"a")), 1);
        assert_eq!(decoded_len(&encode_base64(b"ab")), 2);
        assert_eq!(decoded_len(&encode_base64(b"abc")), 3);
        assert_eq!(decoded_len(&encode_base64(&[0u8; 1000])), 1000);
    }

    #[test]
    fn utf16_len_counts_code_units() {
        assert_eq!(utf16_len("abc"), 3);
        assert_eq!(utf16_len("角色"), 2);
        assert_eq!(utf16_len("😀"), 2);
    }

    #[test]
    fn base64_estimate_rounds_up() {
        assert_eq!(estimate_base64_size(100), 133);
        assert_eq!(estimate_base64_size(1), 2);
    }

    #[test]
    fn categorize_by_mime_prefix() {
        assert_eq!(categorize_content_type("IMAGE/PNG"), FileKind::Image);
        assert_eq!(categorize_content_type("video/mp4"), FileKind::Video);
        assert_eq!(categorize_content_type("application/pdf"), FileKind::Document);
    }

    #[test]
    fn sanitize_strips_separators() {
        assert_eq!(sanitize_filename("../a/b:c.png"), "..abc.png");
        assert_eq!(sanitize_filename("  "), "unknown");
    }

    #[test]
    fn checksum_is_prefixed_hex() {
        let sum = compute_checksum(b"abc");
        assert_eq!(
            sum,
            "sha256-ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
