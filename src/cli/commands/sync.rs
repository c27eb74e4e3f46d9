//! `braid sync` - explicit import/export control.

use crate::cli::SyncArgs;
use crate::cli::commands::Workspace;
use crate::error::Result;
use crate::sync::importer::AutoImportOutcome;
use crate::sync::{METADATA_JSONL_CONTENT_HASH, METADATA_LAST_IMPORT_TIME, hash_file, integrity};

pub fn execute(args: &SyncArgs, json: bool) -> Result<()> {
    let ws = Workspace::open_interactive()?;

    let result = run(&ws, args, json);
    ws.engine.shutdown();
    result
}

fn run(ws: &Workspace, args: &SyncArgs, json: bool) -> Result<()> {
    if args.status {
        return print_status(ws, json);
    }

    let default_both = !args.flush && !args.full && !args.import;

    if args.import || default_both {
        let outcome = if args.import {
            ws.engine.importer().import_now()?
        } else {
            ws.engine.importer().auto_import()?
        };
        report_import(&outcome, json)?;
    }

    if args.flush || args.full || default_both {
        let report = if args.full {
            ws.engine.exporter().flush_full_with(args.force)?
        } else {
            ws.engine.flush_manager().flush_now()?
        };
        if json {
            println!(
                "{}",
                serde_json::json!({
                    "flushed": report.flushed,
                    "mode": format!("{:?}", report.mode),
                    "exported": report.exported,
                    "removed": report.removed,
                    "content_hash": report.content_hash,
                })
            );
        } else if report.flushed {
            println!(
                "Exported {} issue(s) ({} removed) to {}",
                report.exported,
                report.removed,
                ws.paths.jsonl_path.display()
            );
        } else {
            println!("Nothing to export.");
        }
    }

    Ok(())
}

fn report_import(outcome: &AutoImportOutcome, json: bool) -> Result<()> {
    match outcome {
        AutoImportOutcome::Disabled => {
            if !json {
                println!("Auto-import is disabled.");
            }
        }
        AutoImportOutcome::NoFile => {
            if !json {
                println!("No JSONL file to import.");
            }
        }
        AutoImportOutcome::InSync => {
            if !json {
                println!("JSONL already in sync.");
            }
        }
        AutoImportOutcome::Imported(summary) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "created": summary.created,
                        "updated": summary.updated,
                        "skipped": summary.skipped,
                        "remapped": summary.id_mapping,
                    })
                );
            } else {
                println!(
                    "Imported: {} created, {} updated, {} skipped",
                    summary.created, summary.updated, summary.skipped
                );
                for (old, new) in &summary.id_mapping {
                    println!("  remapped {old} -> {new}");
                }
            }
        }
    }
    Ok(())
}

fn print_status(ws: &Workspace, json: bool) -> Result<()> {
    let storage = ws.storage();
    let dirty = storage.dirty_issue_ids()?;
    let stored_hash = storage.metadata(METADATA_JSONL_CONTENT_HASH)?;
    let observed_hash = hash_file(&ws.paths.jsonl_path)?;
    let last_import = storage.metadata(METADATA_LAST_IMPORT_TIME)?;
    let integrity_outcome = integrity::check(storage, &ws.paths.jsonl_path)?;
    let in_sync = stored_hash.is_some() && stored_hash == observed_hash && dirty.is_empty();

    if json {
        println!(
            "{}",
            serde_json::json!({
                "dirty": dirty,
                "stored_content_hash": stored_hash,
                "observed_file_hash": observed_hash,
                "last_import_time": last_import,
                "integrity": format!("{integrity_outcome:?}"),
                "in_sync": in_sync,
            })
        );
    } else {
        println!("JSONL:  {}", ws.paths.jsonl_path.display());
        println!("Dirty issues: {}", dirty.len());
        println!(
            "Stored hash:   {}",
            stored_hash.as_deref().unwrap_or("(never synced)")
        );
        println!(
            "Observed hash: {}",
            observed_hash.as_deref().unwrap_or("(file missing)")
        );
        if let Some(last_import) = last_import {
            println!("Last import:   {last_import}");
        }
        if integrity_outcome.requires_full_export() {
            println!("Integrity: file modified outside braid; next export will rebuild");
        }
        println!("In sync: {}", if in_sync { "yes" } else { "no" });
    }

    Ok(())
}
