//! Export side of the bidirectional sync contract.
//!
//! The exporter is the only writer of the JSONL file. An incremental
//! flush merges dirty records into the existing file; a full flush
//! rebuilds it from every non-ephemeral issue. Both paths run the
//! integrity reconciler first, replace the file atomically, refresh the
//! stored hashes, and clear exactly the dirty ids they handled.

use crate::error::{BraidError, Result};
use crate::storage::Storage;
use crate::sync::{
    JSONL_READ_BUFFER, METADATA_JSONL_CONTENT_HASH, METADATA_JSONL_FILE_HASH,
    METADATA_LAST_IMPORT_TIME, integrity, issue_ids_in_jsonl,
};
use crate::util::{now_stamp, prefix_of, sha256_hex};
use std::collections::{BTreeMap, HashSet};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Which export path ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Merge dirty records into the existing file.
    Incremental,
    /// Rebuild the file from all non-ephemeral issues.
    Full,
}

/// Result of a flush.
#[derive(Debug, Clone)]
pub struct ExportReport {
    /// The path that actually ran (incremental may escalate to full).
    pub mode: FlushMode,
    /// False when there was no work to do.
    pub flushed: bool,
    /// Records written or rewritten.
    pub exported: usize,
    /// Dirty ids whose records were removed from the file.
    pub removed: usize,
    /// Dirty ids skipped because their serialized form matched the last
    /// export.
    pub unchanged: usize,
    /// Ephemeral issues dropped from the output.
    pub wisps_dropped: usize,
    /// SHA-256 of the file contents after the write (empty if no work).
    pub content_hash: String,
}

impl ExportReport {
    fn noop(mode: FlushMode) -> Self {
        Self {
            mode,
            flushed: false,
            exported: 0,
            removed: 0,
            unchanged: 0,
            wisps_dropped: 0,
            content_hash: String::new(),
        }
    }
}

/// A line already present in the JSONL file, kept verbatim unless its
/// issue is dirty.
struct FileEntry {
    raw: String,
    ephemeral: bool,
}

/// The single writer for the JSONL file.
pub struct Exporter {
    storage: Arc<Storage>,
    jsonl_path: PathBuf,
    /// In multi-repo mode on a non-primary worktree, only ids with this
    /// prefix are exported.
    prefix_filter: Option<String>,
    show_progress: bool,
}

impl Exporter {
    #[must_use]
    pub fn new(storage: Arc<Storage>, jsonl_path: PathBuf, prefix_filter: Option<String>) -> Self {
        Self {
            storage,
            jsonl_path,
            prefix_filter,
            show_progress: false,
        }
    }

    /// Show progress indicators on long full-export passes.
    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// The JSONL path this exporter writes.
    #[must_use]
    pub fn jsonl_path(&self) -> &Path {
        &self.jsonl_path
    }

    /// Write only dirty issues, preserving all other records in the file.
    ///
    /// Escalates to a full export when the integrity reconciler reports
    /// the file missing or modified out of band.
    ///
    /// # Errors
    ///
    /// Returns `StoreClosed` during shutdown; otherwise any database or
    /// I/O failure. The dirty set is untouched on failure.
    pub fn flush_incremental(&self) -> Result<ExportReport> {
        if !self.storage.is_open() {
            return Err(BraidError::StoreClosed);
        }
        let outcome = integrity::reconcile(&self.storage, &self.jsonl_path)?;
        if outcome.requires_full_export() {
            return self.flush_full_inner(false);
        }
        self.flush_incremental_inner()
    }

    /// Rebuild the file from all non-ephemeral issues.
    ///
    /// # Errors
    ///
    /// Returns an error if a safety guard trips (empty or stale database)
    /// or on database/I-O failure.
    pub fn flush_full(&self) -> Result<ExportReport> {
        self.flush_full_with(false)
    }

    /// Full export with the safety guards optionally overridden.
    ///
    /// # Errors
    ///
    /// See [`Exporter::flush_full`].
    pub fn flush_full_with(&self, force: bool) -> Result<ExportReport> {
        if !self.storage.is_open() {
            return Err(BraidError::StoreClosed);
        }
        // Run the reconciler for its invalidation side effect: stale
        // per-issue hashes must not survive an out-of-band edit.
        let _ = integrity::reconcile(&self.storage, &self.jsonl_path)?;
        self.flush_full_inner(force)
    }

    fn flush_incremental_inner(&self) -> Result<ExportReport> {
        let dirty = self.storage.dirty_issue_ids()?;
        if dirty.is_empty() {
            tracing::debug!("Flush: no dirty issues, skipping");
            return Ok(ExportReport::noop(FlushMode::Incremental));
        }

        let mut map = read_existing(&self.jsonl_path)?;
        let mut report = ExportReport::noop(FlushMode::Incremental);
        report.flushed = true;
        let mut line_hashes = Vec::new();
        let mut processed = Vec::with_capacity(dirty.len());

        for id in &dirty {
            match self.storage.get_issue(id)? {
                None => {
                    // Deleted in the database: drop its line.
                    if map.remove(id).is_some() {
                        report.removed += 1;
                    }
                }
                Some(issue) if issue.ephemeral => {
                    if map.remove(id).is_some() {
                        report.removed += 1;
                    }
                    report.wisps_dropped += 1;
                }
                Some(issue) => {
                    let line = serde_json::to_string(&issue)?;
                    let line_hash = sha256_hex(line.as_bytes());
                    let on_disk_same = map
                        .get(id)
                        .is_some_and(|entry| sha256_hex(entry.raw.as_bytes()) == line_hash);
                    let stored_hash = self.storage.export_hash(id)?;

                    if on_disk_same && stored_hash.as_deref() == Some(line_hash.as_str()) {
                        report.unchanged += 1;
                    } else {
                        map.insert(
                            id.clone(),
                            FileEntry {
                                raw: line,
                                ephemeral: false,
                            },
                        );
                        report.exported += 1;
                    }
                    line_hashes.push((id.clone(), line_hash));
                }
            }
            processed.push(id.clone());
        }

        self.filter_map(&mut map, &mut report);
        self.write_and_finalize(&map, &processed, &line_hashes, &mut report)?;

        tracing::debug!(
            exported = report.exported,
            removed = report.removed,
            unchanged = report.unchanged,
            "Incremental flush complete"
        );
        Ok(report)
    }

    #[allow(clippy::too_many_lines)]
    fn flush_full_inner(&self, force: bool) -> Result<ExportReport> {
        // Snapshot first: ids dirtied while we run must stay dirty.
        let dirty_snapshot = self.storage.dirty_issue_ids()?;
        let issues = self.storage.all_issues()?;

        if !force {
            self.check_safety_guards(&issues)?;
        }

        let mut map = BTreeMap::new();
        let mut report = ExportReport::noop(FlushMode::Full);
        report.flushed = true;
        let mut line_hashes = Vec::new();

        let progress = crate::util::progress::create_progress_bar(
            issues.len() as u64,
            "Exporting issues",
            self.show_progress,
        );
        for issue in &issues {
            if issue.ephemeral {
                report.wisps_dropped += 1;
                progress.inc(1);
                continue;
            }
            let line = serde_json::to_string(issue)?;
            line_hashes.push((issue.id.clone(), sha256_hex(line.as_bytes())));
            map.insert(
                issue.id.clone(),
                FileEntry {
                    raw: line,
                    ephemeral: false,
                },
            );
            report.exported += 1;
            progress.inc(1);
        }
        progress.finish_with_message("Export complete");

        self.filter_map(&mut map, &mut report);
        line_hashes.retain(|(id, _)| map.contains_key(id));
        self.write_and_finalize(&map, &dirty_snapshot, &line_hashes, &mut report)?;

        tracing::info!(exported = report.exported, "Full export complete");
        Ok(report)
    }

    /// Drop wisps left in the file by external edits, then apply prefix
    /// filtering for non-primary multi-repo worktrees.
    fn filter_map(&self, map: &mut BTreeMap<String, FileEntry>, report: &mut ExportReport) {
        let before = map.len();
        map.retain(|_, entry| !entry.ephemeral);
        let dropped = before - map.len();
        if dropped > 0 {
            report.wisps_dropped += dropped;
        }
        if report.wisps_dropped > 0 {
            tracing::info!(
                count = report.wisps_dropped,
                "Dropped ephemeral issues from export"
            );
        }

        if let Some(prefix) = self.prefix_filter.as_deref() {
            map.retain(|id, _| prefix_of(id) == prefix);
        }
    }

    /// Refuse a full export that would lose data, unless forced.
    fn check_safety_guards(&self, issues: &[crate::model::Issue]) -> Result<()> {
        let exportable = issues.iter().filter(|issue| !issue.ephemeral).count();
        let file_ids = issue_ids_in_jsonl(&self.jsonl_path)?;

        if exportable == 0 && !file_ids.is_empty() {
            return Err(BraidError::Config(format!(
                "Refusing to export empty database over non-empty JSONL file.\n\
                 Database has 0 issues, JSONL has {} issues.\n\
                 This would result in data loss!\n\
                 Hint: Import the JSONL first, or use --force to override.",
                file_ids.len()
            )));
        }

        let db_ids: HashSet<&str> = issues.iter().map(|issue| issue.id.as_str()).collect();
        let mut missing: Vec<&String> = file_ids
            .iter()
            .filter(|id| !db_ids.contains(id.as_str()))
            .filter(|id| {
                self.prefix_filter
                    .as_deref()
                    .is_none_or(|prefix| prefix_of(id) == prefix)
            })
            .collect();
        missing.sort();

        if !missing.is_empty() {
            let preview: Vec<&str> = missing.iter().take(5).map(|s| s.as_str()).collect();
            let more = if missing.len() > 5 {
                format!(" ... and {} more", missing.len() - 5)
            } else {
                String::new()
            };
            return Err(BraidError::Config(format!(
                "Refusing to export stale database that would lose issues.\n\
                 Export would drop {} issue(s) present in the JSONL: {}{}\n\
                 Hint: Run import first, or use --force to override.",
                missing.len(),
                preview.join(", "),
                more
            )));
        }

        Ok(())
    }

    /// Serialize the map in id order, replace the file atomically, refresh
    /// both stored hashes and the import timestamp, record line hashes,
    /// and clear exactly the processed dirty ids.
    fn write_and_finalize(
        &self,
        map: &BTreeMap<String, FileEntry>,
        processed: &[String],
        line_hashes: &[(String, String)],
        report: &mut ExportReport,
    ) -> Result<()> {
        let mut contents = Vec::new();
        for entry in map.values() {
            contents.extend_from_slice(entry.raw.as_bytes());
            contents.push(b'\n');
        }

        write_atomic(&self.jsonl_path, &contents)?;
        report.content_hash = sha256_hex(&contents);

        // Liveness check before re-entering the database: a flush racing a
        // shutdown must not half-update metadata.
        if !self.storage.is_open() {
            return Err(BraidError::StoreClosed);
        }

        self.storage
            .set_metadata(METADATA_JSONL_CONTENT_HASH, &report.content_hash)?;
        self.storage
            .set_metadata(METADATA_JSONL_FILE_HASH, &report.content_hash)?;
        self.storage
            .set_metadata(METADATA_LAST_IMPORT_TIME, &now_stamp())?;
        self.storage.set_export_hashes(line_hashes)?;
        self.storage.clear_dirty_issues(processed)?;

        Ok(())
    }
}

/// Read the existing file into an id-keyed map. Lines that fail to parse
/// are logged and skipped; they never abort an export.
fn read_existing(path: &Path) -> Result<BTreeMap<String, FileEntry>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(BraidError::Io(e)),
    };
    let reader = BufReader::with_capacity(JSONL_READ_BUFFER, file);

    let mut map = BTreeMap::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    line = idx + 1,
                    error = %e,
                    "Skipping unparseable line in existing JSONL"
                );
                continue;
            }
        };
        let Some(id) = value.get("id").and_then(|v| v.as_str()) else {
            tracing::warn!(line = idx + 1, "Skipping JSONL line without an id");
            continue;
        };
        let ephemeral = value
            .get("ephemeral")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        map.insert(
            id.to_string(),
            FileEntry {
                raw: line,
                ephemeral,
            },
        );
    }
    Ok(map)
}

/// Atomic file replacement: sibling temp file disambiguated by pid,
/// rename-over-target with bounded backoff, 0644 on the result. The
/// target is never observable in a torn state; the temp file is removed
/// on any failure.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        BraidError::Config(format!("Invalid output path: {}", path.display()))
    })?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(OsStr::to_str)
        .ok_or_else(|| BraidError::Config(format!("Invalid output path: {}", path.display())))?;
    let temp_path = parent.join(format!("{file_name}.tmp.{}", std::process::id()));

    let write_result = (|| -> Result<()> {
        let mut file = File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);
        rename_with_retry(&temp_path, path)
    })();

    if let Err(e) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o644));
    }

    Ok(())
}

/// Rename with bounded exponential backoff. Some platforms transiently
/// fail renames while another process holds a handle on the target.
fn rename_with_retry(from: &Path, to: &Path) -> Result<()> {
    const ATTEMPTS: u32 = 5;
    let mut delay = Duration::from_millis(10);
    let mut last_err: Option<std::io::Error> = None;

    for attempt in 0..ATTEMPTS {
        match fs::rename(from, to) {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::debug!(attempt, error = %e, "Rename failed, retrying");
                last_err = Some(e);
                if attempt + 1 < ATTEMPTS {
                    thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
    }

    Err(last_err.map_or_else(
        || BraidError::Config("rename failed with no error".to_string()),
        BraidError::Io,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Issue, Status};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn make_issue(id: &str, title: &str) -> Issue {
        let mut issue = Issue::new(id, title);
        issue.created_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        issue.updated_at = issue.created_at;
        issue.created_by = Some("tester".to_string());
        issue
    }

    fn setup(temp: &TempDir) -> (Arc<Storage>, Exporter) {
        let storage = Arc::new(Storage::open_memory().unwrap());
        let exporter = Exporter::new(
            Arc::clone(&storage),
            temp.path().join("issues.jsonl"),
            None,
        );
        (storage, exporter)
    }

    fn file_lines(path: &Path) -> Vec<String> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_flush_writes_sorted_lines_and_hashes() {
        let temp = TempDir::new().unwrap();
        let (storage, exporter) = setup(&temp);
        storage.create_issue(&make_issue("test-2", "Two")).unwrap();
        storage.create_issue(&make_issue("test-1", "One")).unwrap();

        let report = exporter.flush_incremental().unwrap();
        assert!(report.flushed);
        assert_eq!(report.exported, 2);

        let lines = file_lines(exporter.jsonl_path());
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"id\":\"test-1\""));
        assert!(lines[1].contains("\"id\":\"test-2\""));

        let stored = storage
            .metadata(METADATA_JSONL_FILE_HASH)
            .unwrap()
            .unwrap();
        assert_eq!(
            stored,
            crate::sync::hash_file(exporter.jsonl_path()).unwrap().unwrap()
        );
        assert!(storage.dirty_issue_ids().unwrap().is_empty());
    }

    #[test]
    fn test_flush_noop_when_clean() {
        let temp = TempDir::new().unwrap();
        let (_storage, exporter) = setup(&temp);
        let report = exporter.flush_incremental().unwrap();
        assert!(!report.flushed);
        assert!(!exporter.jsonl_path().exists());
    }

    #[test]
    fn test_incremental_merges_and_removes() {
        let temp = TempDir::new().unwrap();
        let (storage, exporter) = setup(&temp);
        for (id, title) in [("test-1", "One"), ("test-2", "Two"), ("test-3", "Three")] {
            storage.create_issue(&make_issue(id, title)).unwrap();
        }
        exporter.flush_incremental().unwrap();

        storage.delete_issue("test-2").unwrap();
        let mut updated = storage.get_issue("test-3").unwrap().unwrap();
        updated.title = "new".to_string();
        updated.updated_at = Utc::now();
        storage.put_issue(&updated).unwrap();

        let report = exporter.flush_incremental().unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.exported, 1);

        let lines = file_lines(exporter.jsonl_path());
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"id\":\"test-1\""));
        assert!(lines[1].contains("\"title\":\"new\""));
    }

    #[test]
    fn test_flush_idempotent() {
        let temp = TempDir::new().unwrap();
        let (storage, exporter) = setup(&temp);
        storage.create_issue(&make_issue("test-1", "One")).unwrap();

        exporter.flush_incremental().unwrap();
        let first = std::fs::read(exporter.jsonl_path()).unwrap();
        exporter.flush_incremental().unwrap();
        let second = std::fs::read(exporter.jsonl_path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_wisps_never_exported() {
        let temp = TempDir::new().unwrap();
        let (storage, exporter) = setup(&temp);
        storage.create_issue(&make_issue("test-1", "Real")).unwrap();
        let mut wisp = make_issue("test-wisp-1", "Scratch");
        wisp.ephemeral = true;
        storage.create_issue(&wisp).unwrap();

        let report = exporter.flush_incremental().unwrap();
        assert_eq!(report.wisps_dropped, 1);
        let lines = file_lines(exporter.jsonl_path());
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("test-1"));
        // The wisp's dirty flag is cleared all the same.
        assert!(storage.dirty_issue_ids().unwrap().is_empty());
    }

    #[test]
    fn test_prefix_filter_on_export() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open_memory().unwrap());
        let exporter = Exporter::new(
            Arc::clone(&storage),
            temp.path().join("issues.jsonl"),
            Some("mine".to_string()),
        );
        storage.create_issue(&make_issue("mine-1", "Keep")).unwrap();
        storage.create_issue(&make_issue("other-1", "Drop")).unwrap();

        exporter.flush_full_with(true).unwrap();
        let lines = file_lines(exporter.jsonl_path());
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("mine-1"));
    }

    #[test]
    fn test_bad_existing_lines_are_skipped_not_fatal() {
        let temp = TempDir::new().unwrap();
        let (storage, exporter) = setup(&temp);
        std::fs::write(exporter.jsonl_path(), "garbage line\n").unwrap();
        // Seed the file hash so the reconciler accepts the file as ours.
        let hash = crate::sync::hash_file(exporter.jsonl_path()).unwrap().unwrap();
        storage.set_metadata(METADATA_JSONL_FILE_HASH, &hash).unwrap();

        storage.create_issue(&make_issue("test-1", "One")).unwrap();
        let report = exporter.flush_incremental().unwrap();
        assert!(report.flushed);
        let lines = file_lines(exporter.jsonl_path());
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_integrity_escalation_rebuilds_file() {
        let temp = TempDir::new().unwrap();
        let (storage, exporter) = setup(&temp);
        storage.create_issue(&make_issue("test-1", "One")).unwrap();
        storage.create_issue(&make_issue("test-2", "Two")).unwrap();
        exporter.flush_incremental().unwrap();

        // Externally truncate the file.
        std::fs::write(exporter.jsonl_path(), b"").unwrap();
        // No new mutations; an incremental flush must still detect the
        // mismatch and rebuild everything.
        let report = exporter.flush_incremental().unwrap();
        assert_eq!(report.mode, FlushMode::Full);
        assert_eq!(file_lines(exporter.jsonl_path()).len(), 2);
    }

    #[test]
    fn test_empty_db_guard() {
        let temp = TempDir::new().unwrap();
        let (storage, exporter) = setup(&temp);
        std::fs::write(
            exporter.jsonl_path(),
            "{\"id\":\"test-1\",\"title\":\"keep\"}\n",
        )
        .unwrap();

        let err = exporter.flush_full().unwrap_err();
        assert!(err.to_string().contains("data loss"));
        // Forced export overrides the guard.
        exporter.flush_full_with(true).unwrap();
        assert_eq!(file_lines(exporter.jsonl_path()).len(), 0);
        let _ = storage;
    }

    #[test]
    fn test_stale_db_guard() {
        let temp = TempDir::new().unwrap();
        let (storage, exporter) = setup(&temp);
        storage.create_issue(&make_issue("test-1", "One")).unwrap();
        std::fs::write(
            exporter.jsonl_path(),
            "{\"id\":\"test-1\",\"title\":\"One\"}\n{\"id\":\"test-9\",\"title\":\"Elsewhere\"}\n",
        )
        .unwrap();

        let err = exporter.flush_full().unwrap_err();
        assert!(err.to_string().contains("stale database"));
    }

    #[test]
    fn test_closed_storage_fails_fast() {
        let temp = TempDir::new().unwrap();
        let (storage, exporter) = setup(&temp);
        storage.close();
        let err = exporter.flush_incremental().unwrap_err();
        assert!(err.is_closed());
    }

    #[test]
    fn test_tombstones_round_trip_through_export() {
        let temp = TempDir::new().unwrap();
        let (storage, exporter) = setup(&temp);
        let mut dead = make_issue("test-1", "Gone");
        dead.status = Status::Tombstone;
        dead.closed_at = Some(dead.updated_at);
        dead.deleted_at = Some(dead.updated_at);
        storage.create_issue(&dead).unwrap();

        exporter.flush_incremental().unwrap();
        let lines = file_lines(exporter.jsonl_path());
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\"status\":\"tombstone\""));
    }

    #[cfg(unix)]
    #[test]
    fn test_file_mode_0644() {
        use std::os::unix::fs::PermissionsExt;
        let temp = TempDir::new().unwrap();
        let (storage, exporter) = setup(&temp);
        storage.create_issue(&make_issue("test-1", "One")).unwrap();
        exporter.flush_incremental().unwrap();
        let mode = std::fs::metadata(exporter.jsonl_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let temp = TempDir::new().unwrap();
        let (storage, exporter) = setup(&temp);
        storage.create_issue(&make_issue("test-1", "One")).unwrap();
        exporter.flush_incremental().unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }
}
