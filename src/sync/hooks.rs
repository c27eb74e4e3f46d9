//! Git hook glue.
//!
//! Thin entry points invoked by the `braid hook` subcommand from the
//! repository's hook scripts. They drive the same sync core as every
//! other caller: the exporter before a commit, the importer after a
//! merge, and the worktree-state-gated importer after a checkout.

use crate::error::Result;
use crate::sync::exporter::ExportReport;
use crate::sync::importer::AutoImportOutcome;
use crate::sync::{ENV_NO_AUTO_STAGE, SyncEngine, hash_file, worktree};
use std::path::Path;
use std::process::Command;

/// Pre-commit: flush pending changes, record the worktree journal, and
/// stage the JSONL so it rides along with the user's commit.
///
/// # Errors
///
/// Returns an error if the flush fails; staging failures are logged and
/// tolerated (committing without the file staged is recoverable, a failed
/// export is not).
pub fn pre_commit(
    engine: &SyncEngine,
    worktree_root: &Path,
    actor: Option<&str>,
) -> Result<ExportReport> {
    let report = engine.flush_manager().flush_now()?;

    let jsonl_path = engine.exporter().jsonl_path();
    let file_hash = hash_file(jsonl_path)?.unwrap_or_default();
    worktree::record_export(
        engine.workspace_dir(),
        worktree_root,
        git_head_commit(worktree_root),
        &file_hash,
        actor.map(str::to_string),
    )?;

    if auto_stage_enabled() {
        stage_file(worktree_root, jsonl_path);
    }

    Ok(report)
}

/// Post-merge: reconcile whatever the merge brought in.
///
/// # Errors
///
/// Propagates importer refusals (conflict markers, parse failures) so the
/// hook can surface them to the user.
pub fn post_merge(engine: &SyncEngine) -> Result<AutoImportOutcome> {
    engine.importer().auto_import()
}

/// Post-checkout: skip the import entirely when the branch switch did not
/// change the JSONL, saving the parse and the database round-trip.
///
/// # Errors
///
/// Propagates importer refusals and journal I/O failures.
pub fn post_checkout(
    engine: &SyncEngine,
    worktree_root: &Path,
) -> Result<AutoImportOutcome> {
    let observed = hash_file(engine.exporter().jsonl_path())?;

    if let Some(state) = worktree::load(engine.workspace_dir(), worktree_root)? {
        if state.matches_file_hash(observed.as_deref()) {
            tracing::debug!("Post-checkout: JSONL unchanged since last export, skipping import");
            return Ok(AutoImportOutcome::InSync);
        }
    }

    let outcome = engine.importer().auto_import()?;

    // A performed import scheduled an export; hooks are short-lived
    // processes, so drain it now and refresh the journal.
    if let AutoImportOutcome::Imported(ref summary) = outcome {
        if summary.scheduled.is_some() {
            engine.flush_manager().flush_now()?;
        }
        let file_hash = hash_file(engine.exporter().jsonl_path())?.unwrap_or_default();
        worktree::record_export(
            engine.workspace_dir(),
            worktree_root,
            git_head_commit(worktree_root),
            &file_hash,
            None,
        )?;
    }

    Ok(outcome)
}

fn auto_stage_enabled() -> bool {
    std::env::var(ENV_NO_AUTO_STAGE).map_or(true, |v| v.trim().is_empty())
}

/// Current HEAD commit of the worktree, if git is available.
fn git_head_commit(worktree_root: &Path) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(worktree_root)
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!commit.is_empty()).then_some(commit)
}

/// Best-effort `git add` of the JSONL file.
fn stage_file(worktree_root: &Path, file: &Path) {
    match Command::new("git")
        .arg("-C")
        .arg(worktree_root)
        .arg("add")
        .arg(file)
        .output()
    {
        Ok(output) if output.status.success() => {
            tracing::debug!(file = %file.display(), "Staged JSONL for commit");
        }
        Ok(output) => {
            tracing::warn!(
                file = %file.display(),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "Failed to stage JSONL"
            );
        }
        Err(e) => {
            tracing::warn!(error = %e, "git not available; JSONL not staged");
        }
    }
}
