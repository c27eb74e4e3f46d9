//! Hashing for issue identity and sync bookkeeping.
//!
//! Uses SHA256 over stable ordered fields with null separators.

use sha2::{Digest, Sha256};

use crate::model::Issue;

/// Compute the identity fingerprint for an issue.
///
/// Two records with the same id but different fingerprints were created
/// independently; the importer treats that as an id collision and remaps
/// the incoming record.
///
/// Fields included (stable order with null separators):
/// - title
/// - `created_at` (RFC3339)
/// - `created_by`
///
/// Everything else is mutable over an issue's lifetime and excluded.
#[must_use]
pub fn identity_fingerprint(issue: &Issue) -> String {
    fingerprint_from_parts(
        &issue.title,
        &issue.created_at.to_rfc3339(),
        issue.created_by.as_deref(),
    )
}

/// Create an identity fingerprint from raw components.
#[must_use]
pub fn fingerprint_from_parts(title: &str, created_at: &str, created_by: Option<&str>) -> String {
    let mut hasher = Sha256::new();

    let mut add_field = |value: &str| {
        if value.contains('\0') {
            hasher.update(value.replace('\0', " ").as_bytes());
        } else {
            hasher.update(value.as_bytes());
        }
        hasher.update(b"\x00");
    };

    add_field(title);
    add_field(created_at);
    add_field(created_by.unwrap_or(""));

    format!("{:x}", hasher.finalize())
}

/// SHA256 of an arbitrary byte slice, hex-encoded.
///
/// Used for per-issue export hashes (over the serialized JSONL line) and
/// for whole-file content hashes.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
