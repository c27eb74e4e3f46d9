//! Configuration management for `braid`.
//!
//! Configuration sources and precedence (highest wins):
//! 1. Environment variables
//! 2. Project config (`.braid/config.yaml`)
//! 3. Workspace metadata (`.braid/metadata.json`: db + jsonl filenames)
//! 4. Defaults

use crate::error::{BraidError, Result};
use crate::storage::Storage;
use crate::sync::{FlushOptions, SyncOptions};
use crate::util::validate_prefix;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Name of the workspace directory discovered by walking up from CWD.
pub const WORKSPACE_DIR_NAME: &str = ".braid";
/// Default database filename used when metadata is missing.
const DEFAULT_DB_FILENAME: &str = "braid.db";
/// Default JSONL filename used when metadata is missing.
const DEFAULT_JSONL_FILENAME: &str = "issues.jsonl";

/// Workspace directory override (skips walk-up discovery).
pub const ENV_DIR: &str = "BRAID_DIR";
/// Absolute JSONL path override.
pub const ENV_JSONL: &str = "BRAID_JSONL";
/// Flush debounce override in milliseconds.
pub const ENV_FLUSH_DEBOUNCE: &str = "BRAID_FLUSH_DEBOUNCE_MS";

/// Startup metadata describing DB + JSONL paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Metadata {
    pub database: String,
    pub jsonl_export: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            database: DEFAULT_DB_FILENAME.to_string(),
            jsonl_export: DEFAULT_JSONL_FILENAME.to_string(),
        }
    }
}

impl Metadata {
    /// Load metadata.json from the workspace directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(workspace_dir: &Path) -> Result<Self> {
        let path = workspace_dir.join("metadata.json");
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)?;
        let mut metadata: Self = serde_json::from_str(&contents)?;

        if metadata.database.trim().is_empty() {
            metadata.database = DEFAULT_DB_FILENAME.to_string();
        }
        if metadata.jsonl_export.trim().is_empty() {
            metadata.jsonl_export = DEFAULT_JSONL_FILENAME.to_string();
        }

        Ok(metadata)
    }
}

/// Project configuration (`.braid/config.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Id prefix for issues created in this workspace.
    pub prefix: String,
    /// Actor recorded on mutations and worktree journals.
    pub actor: Option<String>,
    /// Whether auto-import runs on reads and hooks.
    pub auto_import: bool,
    /// Debounce window for the flush worker, in milliseconds.
    pub flush_debounce_ms: Option<u64>,
    /// Multi-repo mode: several repos share one database.
    pub multi_repo: bool,
    /// In multi-repo mode, the primary worktree exports every prefix;
    /// non-primary worktrees export only their own.
    pub primary_worktree: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            prefix: "bd".to_string(),
            actor: None,
            auto_import: true,
            flush_debounce_ms: None,
            multi_repo: false,
            primary_worktree: true,
        }
    }
}

impl WorkspaceConfig {
    /// Load config.yaml from the workspace directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(workspace_dir: &Path) -> Result<Self> {
        let path = workspace_dir.join("config.yaml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)?;
        let config: Self = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Persist config.yaml into the workspace directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, workspace_dir: &Path) -> Result<()> {
        let contents = serde_yaml::to_string(self)?;
        fs::write(workspace_dir.join("config.yaml"), contents)?;
        Ok(())
    }

    /// Actor for mutations: config value or `$USER`, falling back to
    /// "unknown".
    #[must_use]
    pub fn resolve_actor(&self) -> String {
        self.actor.clone().unwrap_or_else(|| {
            env::var("USER")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "unknown".to_string())
        })
    }
}

/// Resolved filesystem locations for a workspace.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub workspace_dir: PathBuf,
    pub db_path: PathBuf,
    pub jsonl_path: PathBuf,
}

impl ConfigPaths {
    /// Resolve db and jsonl paths for a workspace directory.
    ///
    /// # Errors
    ///
    /// Returns an error if metadata.json cannot be read.
    pub fn resolve(workspace_dir: &Path) -> Result<Self> {
        let metadata = Metadata::load(workspace_dir)?;

        let db_candidate = PathBuf::from(&metadata.database);
        let db_path = if db_candidate.is_absolute() {
            db_candidate
        } else {
            workspace_dir.join(db_candidate)
        };

        Ok(Self {
            workspace_dir: workspace_dir.to_path_buf(),
            db_path,
            jsonl_path: resolve_jsonl_path(workspace_dir, &metadata),
        })
    }
}

fn resolve_jsonl_path(workspace_dir: &Path, metadata: &Metadata) -> PathBuf {
    // Priority 1: BRAID_JSONL environment variable.
    if let Ok(env_path) = env::var(ENV_JSONL) {
        if !env_path.trim().is_empty() {
            return PathBuf::from(env_path);
        }
    }

    // Priority 2: metadata.json.
    let candidate = PathBuf::from(&metadata.jsonl_export);
    if candidate.is_absolute() {
        candidate
    } else {
        workspace_dir.join(candidate)
    }
}

/// Discover the active `.braid` directory.
///
/// Honors `BRAID_DIR` when set, otherwise walks up from `start` (or CWD).
///
/// # Errors
///
/// Returns `NotInitialized` if no workspace directory is found.
pub fn discover_workspace_dir(start: Option<&Path>) -> Result<PathBuf> {
    if let Ok(value) = env::var(ENV_DIR) {
        if !value.trim().is_empty() {
            let path = PathBuf::from(value);
            if path.is_dir() {
                return Ok(path);
            }
        }
    }

    let mut current = match start {
        Some(path) => path.to_path_buf(),
        None => env::current_dir()?,
    };

    loop {
        let candidate = current.join(WORKSPACE_DIR_NAME);
        if candidate.is_dir() {
            return Ok(candidate);
        }

        if !current.pop() {
            break;
        }
    }

    Err(BraidError::NotInitialized)
}

/// Initialize a new workspace under `root`.
///
/// # Errors
///
/// Returns `AlreadyInitialized` unless `force`, or a validation error for
/// a bad prefix.
pub fn init_workspace(root: &Path, prefix: &str, force: bool) -> Result<PathBuf> {
    validate_prefix(prefix)?;

    let workspace_dir = root.join(WORKSPACE_DIR_NAME);
    if workspace_dir.exists() && !force {
        return Err(BraidError::AlreadyInitialized {
            path: workspace_dir,
        });
    }
    fs::create_dir_all(&workspace_dir)?;

    let config = WorkspaceConfig {
        prefix: prefix.to_string(),
        ..Default::default()
    };
    config.save(&workspace_dir)?;

    let metadata = Metadata::default();
    fs::write(
        workspace_dir.join("metadata.json"),
        serde_json::to_string_pretty(&metadata)?,
    )?;

    // Only the JSONL and the config belong in git; the database and the
    // exporter's temp files do not.
    fs::write(
        workspace_dir.join(".gitignore"),
        "braid.db\nbraid.db-wal\nbraid.db-shm\n*.tmp.*\nexport-state/\n",
    )?;

    Ok(workspace_dir)
}

/// Open storage for a workspace, returning the façade and resolved paths.
///
/// # Errors
///
/// Returns an error if metadata cannot be read or the database cannot be
/// opened.
pub fn open_storage(workspace_dir: &Path) -> Result<(Arc<Storage>, ConfigPaths)> {
    let paths = ConfigPaths::resolve(workspace_dir)?;
    let storage = Arc::new(Storage::open(&paths.db_path)?);
    Ok((storage, paths))
}

/// Build the sync engine options for a workspace: prefix filtering for
/// non-primary multi-repo worktrees, the auto-import flag, and the flush
/// debounce (env override wins over config).
#[must_use]
pub fn sync_options(config: &WorkspaceConfig, paths: &ConfigPaths) -> SyncOptions {
    let mut options = SyncOptions::new(paths.jsonl_path.clone(), paths.workspace_dir.clone());

    if config.multi_repo && !config.primary_worktree {
        options.prefix_filter = Some(config.prefix.clone());
    }
    options.auto_import = config.auto_import;

    let debounce_ms = env::var(ENV_FLUSH_DEBOUNCE)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .or(config.flush_debounce_ms);
    if let Some(ms) = debounce_ms {
        options.flush = FlushOptions {
            debounce: Duration::from_millis(ms),
            ..FlushOptions::default()
        };
    }

    options
}
