//! `braid hook` - git hook entry points.

use crate::cli::HookCommand;
use crate::cli::commands::Workspace;
use crate::error::Result;
use crate::sync::hooks;
use crate::sync::importer::AutoImportOutcome;
use std::path::PathBuf;

pub fn execute(command: &HookCommand) -> Result<()> {
    let ws = Workspace::open()?;
    let worktree_root = worktree_root(&ws);

    let result = match command {
        HookCommand::PreCommit => {
            let actor = ws.config.resolve_actor();
            hooks::pre_commit(&ws.engine, &worktree_root, Some(&actor)).map(|report| {
                if report.flushed {
                    println!("braid: exported {} issue(s)", report.exported);
                }
            })
        }
        HookCommand::PostMerge => hooks::post_merge(&ws.engine).and_then(|outcome| {
            drain_scheduled(&ws, &outcome)?;
            report(&outcome);
            Ok(())
        }),
        HookCommand::PostCheckout => {
            hooks::post_checkout(&ws.engine, &worktree_root).map(|outcome| {
                report(&outcome);
            })
        }
    };

    ws.engine.shutdown();
    result
}

/// The repository root: the parent of the workspace directory.
fn worktree_root(ws: &Workspace) -> PathBuf {
    ws.paths
        .workspace_dir
        .parent()
        .map_or_else(|| ws.paths.workspace_dir.clone(), PathBuf::from)
}

/// A performed import scheduled an export with the flush manager; hook
/// processes exit immediately, so drain it now.
fn drain_scheduled(ws: &Workspace, outcome: &AutoImportOutcome) -> Result<()> {
    if let AutoImportOutcome::Imported(summary) = outcome {
        if summary.scheduled.is_some() {
            ws.engine.flush_manager().flush_now()?;
        }
    }
    Ok(())
}

fn report(outcome: &AutoImportOutcome) {
    match outcome {
        AutoImportOutcome::Imported(summary) => {
            println!(
                "braid: imported {} created, {} updated",
                summary.created, summary.updated
            );
            for (old, new) in &summary.id_mapping {
                println!("braid: remapped {old} -> {new}");
            }
        }
        AutoImportOutcome::Disabled
        | AutoImportOutcome::NoFile
        | AutoImportOutcome::InSync => {}
    }
}
