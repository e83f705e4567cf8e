//! mb_common
//!
//! Canonical JSON serialization + SHA-256 hashing utilities.
//! This exists to guarantee determinism for:
//! - payload signatures shared across every dispatched candidate
//! - redaction idempotence checks
//!
//! IMPORTANT: Do not "pretty print". Hashes must be computed over canonical bytes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Immutable budget governing the context-pack pipeline's truncation stage.
///
/// Shared between candidate/runtime configuration (which supplies it) and
/// the context-pack crate (which enforces it), so it lives in this common
/// crate rather than creating a dependency edge between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub max_files: usize,
    pub max_snippets: usize,
    pub max_lines_per_snippet: usize,
    pub max_chars_total: usize,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            max_files: 6,
            max_snippets: 10,
            max_lines_per_snippet: 160,
            max_chars_total: 12_000,
        }
    }
}

impl Budget {
    /// Parse a budget from a raw JSON object, falling back field-by-field to
    /// the default for anything missing, non-numeric, or non-positive.
    pub fn from_raw(raw: Option<&serde_json::Value>) -> Self {
        let defaults = Self::default();
        let Some(raw) = raw.and_then(|v| v.as_object()) else {
            return defaults;
        };
        Self {
            max_files: positive_usize(raw.get("max_files"), defaults.max_files),
            max_snippets: positive_usize(raw.get("max_snippets"), defaults.max_snippets),
            max_lines_per_snippet: positive_usize(
                raw.get("max_lines_per_snippet"),
                defaults.max_lines_per_snippet,
            ),
            max_chars_total: positive_usize(raw.get("max_chars_total"), defaults.max_chars_total),
        }
    }
}

/// Coerce a JSON value to a positive `usize`, falling back to `default` for
/// anything absent, non-numeric, zero, or negative.
pub fn positive_usize(value: Option<&serde_json::Value>, default: usize) -> usize {
    match value.and_then(|v| v.as_i64()) {
        Some(n) if n > 0 => n as usize,
        _ => default,
    }
}

#[derive(Debug, Error)]
pub enum CanonError {
    #[error("failed to serialize json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize to canonical JSON bytes:
/// - stable key ordering (we enforce sorting via Value roundtrip)
/// - no whitespace
/// - UTF-8
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonError> {
    let v = serde_json::to_value(value)?;
    let sorted = sort_json_value(v);
    Ok(serde_json::to_vec(&sorted)?)
}

/// Return "sha256:<hex>" of canonical JSON bytes.
pub fn sha256_canonical_json<T: Serialize>(value: &T) -> Result<String, CanonError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(sha256_bytes(&bytes))
}

/// Return "sha256:<hex>" of raw bytes.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    format!("sha256:{}", sha256_hex(bytes))
}

/// Return the bare lowercase hex SHA-256 digest of raw bytes, with no
/// "sha256:" prefix. Used for payload signatures, which are specified as
/// bare hex rather than the prefixed form used elsewhere in this crate.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Bare lowercase hex SHA-256 of a value's canonical JSON serialization.
pub fn sha256_hex_canonical_json<T: Serialize>(value: &T) -> Result<String, CanonError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(sha256_hex(&bytes))
}

fn sort_json_value(v: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k, sort_json_value(v));
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json_value).collect()),
        other => other,
    }
}
