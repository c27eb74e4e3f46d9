//! Import side of the bidirectional sync contract.
//!
//! Auto-import reconciles external modifications to the JSONL file (git
//! pull, manual edit, another tool) into the database. It is hash-gated:
//! the file's SHA-256 against the stored `jsonl_content_hash` is the
//! durable idempotency key. Filesystem mtime is unreliable (git pull
//! resets it) and is never consulted.

use crate::error::{BraidError, Result};
use crate::model::Issue;
use crate::storage::{ImportOptions, Storage};
use crate::sync::exporter::FlushMode;
use crate::sync::flush::FlushManager;
use crate::sync::{
    ENV_NO_AUTO_IMPORT, METADATA_JSONL_CONTENT_HASH, METADATA_LAST_IMPORT_TIME,
    ensure_no_conflict_markers, hash_file, open_jsonl_reader,
};
use crate::util::now_stamp;
use std::collections::HashMap;
use std::io::{BufRead, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What `auto_import` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoImportOutcome {
    /// Auto-import is disabled (config or environment).
    Disabled,
    /// No JSONL file exists; nothing to import.
    NoFile,
    /// The file hash matches the stored content hash; import is redundant.
    InSync,
    /// The file was imported.
    Imported(ImportSummary),
}

/// Counts and scheduling decision for a performed import.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImportSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Collided ids, old -> freshly allocated.
    pub id_mapping: HashMap<String, String>,
    /// Export mode scheduled with the flush manager, if any.
    pub scheduled: Option<FlushMode>,
}

/// Owner of the read side: parses the JSONL file and reconciles it into
/// the database through the storage façade's import primitive.
pub struct Importer {
    storage: Arc<Storage>,
    jsonl_path: PathBuf,
    flush: Arc<FlushManager>,
    enabled: bool,
    show_progress: bool,
}

impl Importer {
    #[must_use]
    pub fn new(
        storage: Arc<Storage>,
        jsonl_path: PathBuf,
        flush: Arc<FlushManager>,
        enabled: bool,
    ) -> Self {
        Self {
            storage,
            jsonl_path,
            flush,
            enabled,
            show_progress: false,
        }
    }

    /// Show a spinner while reading large files.
    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// The JSONL path this importer reads.
    #[must_use]
    pub fn jsonl_path(&self) -> &Path {
        &self.jsonl_path
    }

    /// Import the file if its content hash shows it has changed.
    ///
    /// A refused import (conflict markers, parse failure) leaves the
    /// database and the stored hashes untouched.
    ///
    /// # Errors
    ///
    /// Returns `ConflictMarkers` for a damaged file, `JsonlParse` with a
    /// line number and snippet for malformed JSON, or any storage error.
    pub fn auto_import(&self) -> Result<AutoImportOutcome> {
        // Defense in depth: higher layers check this flag too, but a
        // disabled auto-import must hold even when called directly.
        if !self.enabled || env_disabled() {
            tracing::debug!("Auto-import disabled, skipping");
            return Ok(AutoImportOutcome::Disabled);
        }

        let Some(observed) = hash_file(&self.jsonl_path)? else {
            return Ok(AutoImportOutcome::NoFile);
        };

        let stored = self.storage.metadata(METADATA_JSONL_CONTENT_HASH)?;
        if stored.as_deref() == Some(observed.as_str()) {
            tracing::debug!("JSONL content hash unchanged, skipping import");
            return Ok(AutoImportOutcome::InSync);
        }

        self.import_inner(&observed).map(AutoImportOutcome::Imported)
    }

    /// Import unconditionally, bypassing the content-hash gate (used by
    /// the explicit `sync --import` command). Conflict and parse refusals
    /// still apply.
    ///
    /// # Errors
    ///
    /// See [`Importer::auto_import`].
    pub fn import_now(&self) -> Result<AutoImportOutcome> {
        let Some(observed) = hash_file(&self.jsonl_path)? else {
            return Ok(AutoImportOutcome::NoFile);
        };
        self.import_inner(&observed).map(AutoImportOutcome::Imported)
    }

    fn import_inner(&self, observed_hash: &str) -> Result<ImportSummary> {
        // Refuse visibly damaged files before touching the database.
        ensure_no_conflict_markers(&self.jsonl_path)?;

        let spinner =
            crate::util::progress::create_spinner("Reading JSONL", self.show_progress);
        let issues = read_issues(&self.jsonl_path)?;
        spinner.finish_with_message("Read JSONL");
        let parsed = issues.len();

        // Any prior per-issue tracking is invalidated by the incoming edit.
        self.storage.clear_all_export_hashes()?;

        // Lenient options: auto-import must accept whatever the user pulled.
        let options = ImportOptions {
            skip_prefix_validation: true,
            expected_prefix: None,
        };
        let result = self.storage.import_issues_core(issues, &options)?;

        let scheduled = if result.is_noop() {
            // Formatting-only difference; record the new hash, export nothing.
            None
        } else if result.id_mapping.is_empty() {
            self.flush.mark_dirty(false);
            Some(FlushMode::Incremental)
        } else {
            // Remaps can affect arbitrary records: dependencies elsewhere
            // in the file may reference the old ids.
            self.flush.mark_dirty(true);
            Some(FlushMode::Full)
        };

        // Store the hash read before the import, not a post-export hash; a
        // scheduled export will overwrite both.
        self.storage
            .set_metadata(METADATA_JSONL_CONTENT_HASH, observed_hash)?;
        self.storage
            .set_metadata(METADATA_LAST_IMPORT_TIME, &now_stamp())?;

        tracing::info!(
            parsed,
            created = result.created,
            updated = result.updated,
            remapped = result.id_mapping.len(),
            "Import complete"
        );

        Ok(ImportSummary {
            created: result.created,
            updated: result.updated,
            skipped: result.skipped,
            id_mapping: result.id_mapping,
            scheduled,
        })
    }
}

fn env_disabled() -> bool {
    std::env::var(ENV_NO_AUTO_IMPORT).is_ok_and(|v| !v.trim().is_empty())
}

/// Parse every line of the file into an [`Issue`]. Unlike the exporter's
/// tolerant merge, a single malformed line aborts the whole import.
fn read_issues(path: &Path) -> Result<Vec<Issue>> {
    let reader = match open_jsonl_reader(path) {
        Ok(r) => r,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BraidError::Io(e)),
    };

    let mut issues = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut issue: Issue = serde_json::from_str(&line).map_err(|e| {
            BraidError::JsonlParse {
                line: idx + 1,
                reason: e.to_string(),
                snippet: line.chars().take(80).collect(),
            }
        })?;
        issue.normalize();
        issues.push(issue);
    }
    Ok(issues)
}
