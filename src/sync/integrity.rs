//! Integrity reconciliation between the stored export hash and the file.
//!
//! The exporter runs this before any write; doctor-style health checks run
//! it read-only. It never modifies user-visible data, only invalidates the
//! assumption of incremental consistency so the next export rebuilds from
//! scratch.

use crate::error::Result;
use crate::storage::Storage;
use crate::sync::{METADATA_JSONL_FILE_HASH, hash_file};
use std::path::Path;

/// Outcome of an integrity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Stored and observed hashes agree (or nothing was ever exported).
    NoAction,
    /// The file was modified outside the exporter; incremental state has
    /// been invalidated and the next export must rebuild everything.
    FullExportRequired { reason: String },
}

impl ReconcileOutcome {
    /// True if the next export must be a full rebuild.
    #[must_use]
    pub const fn requires_full_export(&self) -> bool {
        matches!(self, Self::FullExportRequired { .. })
    }
}

/// Compare the stored `jsonl_file_hash` against the observed file hash.
///
/// On mismatch or a missing file, clears the per-issue export hashes and
/// the stored file hash, then reports that a full export is required.
///
/// # Errors
///
/// Returns an error if the database or the file cannot be read.
pub fn reconcile(storage: &Storage, jsonl_path: &Path) -> Result<ReconcileOutcome> {
    let Some(stored) = storage.metadata(METADATA_JSONL_FILE_HASH)? else {
        // First ever export in this workspace.
        return Ok(ReconcileOutcome::NoAction);
    };
    if stored.is_empty() {
        return Ok(ReconcileOutcome::NoAction);
    }

    let Some(observed) = hash_file(jsonl_path)? else {
        tracing::warn!(
            path = %jsonl_path.display(),
            "Export hash recorded but JSONL file is missing; scheduling full export"
        );
        invalidate(storage)?;
        return Ok(ReconcileOutcome::FullExportRequired {
            reason: "JSONL file is missing".to_string(),
        });
    };

    if observed == stored {
        return Ok(ReconcileOutcome::NoAction);
    }

    tracing::info!(
        path = %jsonl_path.display(),
        "JSONL file changed outside the exporter; scheduling full export"
    );
    invalidate(storage)?;
    Ok(ReconcileOutcome::FullExportRequired {
        reason: "JSONL file hash does not match last export".to_string(),
    })
}

/// Read-only variant for health checks: reports what [`reconcile`] would
/// decide without invalidating anything.
///
/// # Errors
///
/// Returns an error if the database or the file cannot be read.
pub fn check(storage: &Storage, jsonl_path: &Path) -> Result<ReconcileOutcome> {
    let Some(stored) = storage.metadata(METADATA_JSONL_FILE_HASH)? else {
        return Ok(ReconcileOutcome::NoAction);
    };
    if stored.is_empty() {
        return Ok(ReconcileOutcome::NoAction);
    }
    match hash_file(jsonl_path)? {
        None => Ok(ReconcileOutcome::FullExportRequired {
            reason: "JSONL file is missing".to_string(),
        }),
        Some(observed) if observed == stored => Ok(ReconcileOutcome::NoAction),
        Some(_) => Ok(ReconcileOutcome::FullExportRequired {
            reason: "JSONL file hash does not match last export".to_string(),
        }),
    }
}

fn invalidate(storage: &Storage) -> Result<()> {
    storage.clear_all_export_hashes()?;
    storage.delete_metadata(METADATA_JSONL_FILE_HASH)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::METADATA_JSONL_FILE_HASH;
    use crate::util::sha256_hex;
    use tempfile::TempDir;

    #[test]
    fn test_no_stored_hash_is_no_action() {
        let storage = Storage::open_memory().unwrap();
        let temp = TempDir::new().unwrap();
        let outcome = reconcile(&storage, &temp.path().join("issues.jsonl")).unwrap();
        assert_eq!(outcome, ReconcileOutcome::NoAction);
    }

    #[test]
    fn test_matching_hash_is_no_action() {
        let storage = Storage::open_memory().unwrap();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("issues.jsonl");
        std::fs::write(&path, b"line\n").unwrap();
        storage
            .set_metadata(METADATA_JSONL_FILE_HASH, &sha256_hex(b"line\n"))
            .unwrap();
        assert_eq!(reconcile(&storage, &path).unwrap(), ReconcileOutcome::NoAction);
    }

    #[test]
    fn test_missing_file_requires_full_export() {
        let storage = Storage::open_memory().unwrap();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("issues.jsonl");
        storage
            .set_metadata(METADATA_JSONL_FILE_HASH, "deadbeef")
            .unwrap();
        storage
            .set_export_hashes(&[("bd-1".to_string(), "abc".to_string())])
            .unwrap();

        let outcome = reconcile(&storage, &path).unwrap();
        assert!(outcome.requires_full_export());
        // Incremental state invalidated.
        assert!(storage.export_hash("bd-1").unwrap().is_none());
        assert!(storage.metadata(METADATA_JSONL_FILE_HASH).unwrap().is_none());
    }

    #[test]
    fn test_modified_file_requires_full_export() {
        let storage = Storage::open_memory().unwrap();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("issues.jsonl");
        std::fs::write(&path, b"edited externally\n").unwrap();
        storage
            .set_metadata(METADATA_JSONL_FILE_HASH, &sha256_hex(b"what we wrote\n"))
            .unwrap();

        let outcome = reconcile(&storage, &path).unwrap();
        assert!(outcome.requires_full_export());
    }

    #[test]
    fn test_check_is_read_only() {
        let storage = Storage::open_memory().unwrap();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("issues.jsonl");
        storage
            .set_metadata(METADATA_JSONL_FILE_HASH, "deadbeef")
            .unwrap();
        storage
            .set_export_hashes(&[("bd-1".to_string(), "abc".to_string())])
            .unwrap();

        let outcome = check(&storage, &path).unwrap();
        assert!(outcome.requires_full_export());
        // Nothing invalidated.
        assert!(storage.export_hash("bd-1").unwrap().is_some());
        assert!(storage.metadata(METADATA_JSONL_FILE_HASH).unwrap().is_some());
    }
}
