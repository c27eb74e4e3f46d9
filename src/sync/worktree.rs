//! Per-worktree export state.
//!
//! Repos where multiple worktrees share one database keep a small journal
//! per worktree under `<workspace>/export-state/`. The post-checkout hook
//! compares the current file hash against the journal and skips the
//! import entirely when nothing changed, bypassing even the content-hash
//! gate inside the importer.
//!
//! Filenames are the first 64 bits of the SHA-256 of the worktree's
//! absolute path: short enough for tractable names, and the full path
//! stored inside the state lets tools disambiguate the rare collision.

use crate::error::{BraidError, Result};
use crate::util::sha256_hex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory under the workspace holding per-worktree journals.
const EXPORT_STATE_DIR: &str = "export-state";

/// Journal of the last sync activity in one worktree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorktreeState {
    /// Absolute worktree root this state belongs to.
    pub worktree_path: String,
    /// First 16 hex chars of sha256(worktree_path); also the filename stem.
    pub path_hash: String,
    /// Backend commit at last export. Opaque; may be empty.
    #[serde(default)]
    pub last_export_commit: String,
    /// Wall clock of the last export.
    #[serde(default)]
    pub last_export_at: Option<DateTime<Utc>>,
    /// Hash of the JSONL file at last export.
    #[serde(default)]
    pub jsonl_hash: String,
    /// Actor that performed the last export.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

impl WorktreeState {
    /// Fresh state for a worktree that just exported.
    #[must_use]
    pub fn new(worktree_root: &Path, jsonl_hash: &str) -> Self {
        Self {
            worktree_path: worktree_root.to_string_lossy().into_owned(),
            path_hash: worktree_path_hash(worktree_root),
            last_export_commit: String::new(),
            last_export_at: Some(Utc::now()),
            jsonl_hash: jsonl_hash.to_string(),
            actor: None,
        }
    }

    /// True if the file hash matches this journal: the checkout did not
    /// change the JSONL and the import can be skipped outright.
    #[must_use]
    pub fn matches_file_hash(&self, observed: Option<&str>) -> bool {
        !self.jsonl_hash.is_empty() && observed == Some(self.jsonl_hash.as_str())
    }
}

/// First 64 bits of sha256 of the worktree's absolute path, hex-encoded.
#[must_use]
pub fn worktree_path_hash(worktree_root: &Path) -> String {
    let full = sha256_hex(worktree_root.to_string_lossy().as_bytes());
    full[..16].to_string()
}

/// `<workspace>/export-state/<path-hash>.json`
#[must_use]
pub fn worktree_state_path(workspace_dir: &Path, worktree_root: &Path) -> PathBuf {
    workspace_dir
        .join(EXPORT_STATE_DIR)
        .join(format!("{}.json", worktree_path_hash(worktree_root)))
}

/// Load the journal for a worktree. `None` means "never synced here";
/// the first operation treats that as a full export.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load(workspace_dir: &Path, worktree_root: &Path) -> Result<Option<WorktreeState>> {
    let path = worktree_state_path(workspace_dir, worktree_root);
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path)
        .map_err(|e| BraidError::context(format!("read worktree state {}", path.display()), e))?;
    let state = serde_json::from_str(&contents)
        .map_err(|e| BraidError::context(format!("parse worktree state {}", path.display()), e))?;
    Ok(Some(state))
}

/// Persist a journal, creating the state directory (mode 0750) on demand.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn save(workspace_dir: &Path, state: &WorktreeState) -> Result<()> {
    let dir = workspace_dir.join(EXPORT_STATE_DIR);
    if !dir.exists() {
        create_state_dir(&dir)?;
    }

    let path = dir.join(format!("{}.json", state.path_hash));
    let contents = serde_json::to_string_pretty(state)?;
    fs::write(&path, contents)
        .map_err(|e| BraidError::context(format!("write worktree state {}", path.display()), e))?;
    Ok(())
}

/// Record a successful export for a worktree.
///
/// # Errors
///
/// Returns an error if the journal cannot be written.
pub fn record_export(
    workspace_dir: &Path,
    worktree_root: &Path,
    commit: Option<String>,
    jsonl_hash: &str,
    actor: Option<String>,
) -> Result<WorktreeState> {
    let mut state = WorktreeState::new(worktree_root, jsonl_hash);
    if let Some(commit) = commit {
        state.last_export_commit = commit;
    }
    state.actor = actor;
    save(workspace_dir, &state)?;
    Ok(state)
}

#[cfg(unix)]
fn create_state_dir(dir: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o750)
        .create(dir)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_state_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    Ok(())
}
