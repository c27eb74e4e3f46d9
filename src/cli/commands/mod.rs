//! Command implementations.

pub mod close;
pub mod create;
pub mod delete;
pub mod doctor;
pub mod hook;
pub mod init;
pub mod list;
pub mod show;
pub mod sync;
pub mod update;

use crate::config::{self, ConfigPaths, WorkspaceConfig};
use crate::error::Result;
use crate::storage::Storage;
use crate::sync::SyncEngine;
use crate::util::{allocate_id, max_numeric_suffix};
use std::sync::Arc;

/// An opened workspace: config, resolved paths, and the sync engine.
pub struct Workspace {
    pub config: WorkspaceConfig,
    pub paths: ConfigPaths,
    pub engine: SyncEngine,
}

impl Workspace {
    /// Discover and open the workspace for the current directory.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` when no workspace is found, or any
    /// storage/config error.
    pub fn open() -> Result<Self> {
        Self::open_inner(false)
    }

    /// Open with progress indicators enabled for long sync passes
    /// (explicit `braid sync` on an interactive terminal).
    ///
    /// # Errors
    ///
    /// See [`Workspace::open`].
    pub fn open_interactive() -> Result<Self> {
        Self::open_inner(true)
    }

    fn open_inner(interactive: bool) -> Result<Self> {
        let workspace_dir = config::discover_workspace_dir(None)?;
        let workspace_config = WorkspaceConfig::load(&workspace_dir)?;
        let (storage, paths) = config::open_storage(&workspace_dir)?;
        let mut options = config::sync_options(&workspace_config, &paths);
        options.show_progress = interactive && crate::util::progress::should_show_progress();
        let engine = SyncEngine::new(storage, &options);
        Ok(Self {
            config: workspace_config,
            paths,
            engine,
        })
    }

    /// Open and reconcile external edits to the JSONL file first, so the
    /// command sees whatever a git pull or manual edit brought in.
    ///
    /// # Errors
    ///
    /// Propagates importer refusals (conflict markers, parse failures) so
    /// the user resolves them before mutating.
    pub fn open_synced() -> Result<Self> {
        let ws = Self::open()?;
        ws.engine.importer().auto_import()?;
        Ok(ws)
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<Storage> {
        self.engine.storage()
    }

    /// Allocate the next numeric id within this workspace's prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the id listing fails.
    pub fn next_id(&self) -> Result<String> {
        let ids = self.storage().all_ids()?;
        let start = max_numeric_suffix(ids.iter().map(String::as_str), &self.config.prefix) + 1;
        Ok(allocate_id(&self.config.prefix, start, |candidate| {
            ids.iter().any(|id| id == candidate)
        }))
    }

    /// Flush pending changes synchronously, then stop the worker.
    ///
    /// # Errors
    ///
    /// Surfaces the final flush failure (the dirty set is retained for a
    /// later retry).
    pub fn finish(self) -> Result<()> {
        let flushed = self.engine.flush_manager().flush_now();
        self.engine.shutdown();
        flushed.map(|_| ())
    }
}
