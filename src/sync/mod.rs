//! Bidirectional JSONL sync engine.
//!
//! The durable state of a workspace lives in two coupled representations:
//! the SQLite database (authoritative) and a line-delimited JSON file
//! (git-committed, mergeable). This module keeps them coherent:
//!
//! - Export: dirty-set incremental or full rebuild, atomic replacement
//! - Import: hash-gated, conflict-refusing, collision-remapping
//! - FlushManager: debounced single-writer scheduler
//! - Integrity reconciler: detects out-of-band file modifications
//! - Worktree state: per-worktree journal gating redundant imports

pub mod exporter;
pub mod flush;
pub mod hooks;
pub mod importer;
pub mod integrity;
pub mod worktree;

pub use exporter::{ExportReport, Exporter, FlushMode};
pub use flush::{FlushManager, FlushOptions};
pub use importer::{AutoImportOutcome, Importer};
pub use integrity::{ReconcileOutcome, reconcile};
pub use worktree::{WorktreeState, worktree_state_path};

use crate::error::{BraidError, Result};
use crate::storage::Storage;
use crate::util::sha256_hex;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Hash of the file contents at last successful export or import; the
/// idempotency key for auto-import.
pub const METADATA_JSONL_CONTENT_HASH: &str = "jsonl_content_hash";
/// Written only by the exporter; the integrity reconciler compares it to
/// the observed file hash to detect out-of-band modifications.
pub const METADATA_JSONL_FILE_HASH: &str = "jsonl_file_hash";
/// Updated after a successful import or export; consulted by external
/// staleness checks. RFC3339 with nanosecond precision.
pub const METADATA_LAST_IMPORT_TIME: &str = "last_import_time";

/// Disables auto-import entirely when set (non-empty).
pub const ENV_NO_AUTO_IMPORT: &str = "BRAID_NO_AUTO_IMPORT";
/// Skips `git add` of the JSONL in the pre-commit hook when set.
pub const ENV_NO_AUTO_STAGE: &str = "BRAID_NO_AUTO_STAGE";

/// Line scanners must accept lines up to at least 2 MiB; smaller limits
/// corrupt issues with long descriptions.
pub const JSONL_READ_BUFFER: usize = 2 * 1024 * 1024;

/// Open a buffered reader over a JSONL file.
pub(crate) fn open_jsonl_reader(path: &Path) -> std::io::Result<BufReader<File>> {
    Ok(BufReader::with_capacity(JSONL_READ_BUFFER, File::open(path)?))
}

/// SHA-256 of the raw file contents, or `None` if the file is missing.
///
/// # Errors
///
/// Returns an error for any I/O failure other than a missing file.
pub fn hash_file(path: &Path) -> Result<Option<String>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(BraidError::Io(e)),
    };
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    Ok(Some(sha256_hex(&contents)))
}

/// First git merge conflict marker in the file, if any, as a 1-based line
/// number.
///
/// The check is line-anchored: markers embedded inside a JSON string are
/// harmless and ignored.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn scan_conflict_markers(path: &Path) -> Result<Option<usize>> {
    let reader = open_jsonl_reader(path)?;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if is_conflict_marker(&line) {
            return Ok(Some(idx + 1));
        }
    }
    Ok(None)
}

fn is_conflict_marker(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with("<<<<<<< ")
        || trimmed == "======="
        || trimmed.starts_with(">>>>>>> ")
}

/// Fail with a directive diagnostic if the file contains merge markers.
///
/// # Errors
///
/// Returns [`BraidError::ConflictMarkers`] naming the first marker line.
pub fn ensure_no_conflict_markers(path: &Path) -> Result<()> {
    match scan_conflict_markers(path)? {
        None => Ok(()),
        Some(line) => Err(BraidError::ConflictMarkers {
            path: path.to_path_buf(),
            line,
        }),
    }
}

/// Issue ids present in a JSONL file. Lines that fail to parse are
/// skipped; this is used by safety guards, not by the importer.
///
/// # Errors
///
/// Returns an error if the file cannot be read (missing file yields an
/// empty set).
pub fn issue_ids_in_jsonl(path: &Path) -> Result<std::collections::HashSet<String>> {
    let reader = match open_jsonl_reader(path) {
        Ok(r) => r,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(std::collections::HashSet::new()),
        Err(e) => return Err(BraidError::Io(e)),
    };

    let mut ids = std::collections::HashSet::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) {
            if let Some(id) = value.get("id").and_then(|v| v.as_str()) {
                ids.insert(id.to_string());
            }
        }
    }
    Ok(ids)
}

/// Options assembling a [`SyncEngine`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Path of the JSONL file.
    pub jsonl_path: PathBuf,
    /// Workspace directory (holds worktree export state).
    pub workspace_dir: PathBuf,
    /// When operating in multi-repo mode as a non-primary worktree, only
    /// ids with this prefix are exported.
    pub prefix_filter: Option<String>,
    /// User flag: auto-import runs only when true.
    pub auto_import: bool,
    /// Flush debounce/coalescing windows.
    pub flush: FlushOptions,
    /// Show progress indicators on long import/export passes.
    pub show_progress: bool,
}

impl SyncOptions {
    /// Defaults for a single-repo workspace.
    #[must_use]
    pub fn new(jsonl_path: PathBuf, workspace_dir: PathBuf) -> Self {
        Self {
            jsonl_path,
            workspace_dir,
            prefix_filter: None,
            auto_import: true,
            flush: FlushOptions::default(),
            show_progress: false,
        }
    }
}

/// The assembled sync engine: one storage façade, one exporter, one flush
/// manager, one importer.
pub struct SyncEngine {
    storage: Arc<Storage>,
    exporter: Arc<Exporter>,
    flush: Arc<FlushManager>,
    importer: Importer,
    workspace_dir: PathBuf,
}

impl SyncEngine {
    /// Wire up the engine over an open storage façade.
    #[must_use]
    pub fn new(storage: Arc<Storage>, options: &SyncOptions) -> Self {
        let exporter = Arc::new(
            Exporter::new(
                Arc::clone(&storage),
                options.jsonl_path.clone(),
                options.prefix_filter.clone(),
            )
            .with_progress(options.show_progress),
        );
        let flush = Arc::new(FlushManager::start(
            Arc::clone(&exporter),
            options.flush.clone(),
        ));
        let importer = Importer::new(
            Arc::clone(&storage),
            options.jsonl_path.clone(),
            Arc::clone(&flush),
            options.auto_import,
        )
        .with_progress(options.show_progress);
        Self {
            storage,
            exporter,
            flush,
            importer,
            workspace_dir: options.workspace_dir.clone(),
        }
    }

    /// The storage façade the engine runs against.
    #[must_use]
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// The workspace directory (holds worktree export state).
    #[must_use]
    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    /// The exporter (direct flush entry points).
    #[must_use]
    pub fn exporter(&self) -> &Arc<Exporter> {
        &self.exporter
    }

    /// The flush manager (debounced scheduling).
    #[must_use]
    pub fn flush_manager(&self) -> &Arc<FlushManager> {
        &self.flush
    }

    /// The importer (auto-import entry point).
    #[must_use]
    pub fn importer(&self) -> &Importer {
        &self.importer
    }

    /// Drain pending flushes and stop the worker. Call before dropping a
    /// mutated engine; a flush in progress completes first.
    pub fn shutdown(&self) {
        self.flush.shutdown();
    }
}
