//! `braid create` - create a new issue.

use crate::cli::CreateArgs;
use crate::cli::commands::Workspace;
use crate::error::{BraidError, Result};
use crate::model::Issue;
use crate::util::allocate_id;
use std::str::FromStr;

pub fn execute(args: &CreateArgs, json: bool) -> Result<()> {
    if args.title.trim().is_empty() {
        return Err(BraidError::validation("title", "cannot be empty"));
    }

    let ws = Workspace::open_synced()?;

    let id = if args.ephemeral {
        next_wisp_id(&ws)?
    } else {
        ws.next_id()?
    };

    let mut issue = Issue::new(&id, args.title.trim());
    issue.description = args.description.clone();
    issue.priority = FromStr::from_str(&args.priority)?;
    issue.issue_type = FromStr::from_str(&args.issue_type)?;
    issue.assignee = args.assignee.clone();
    issue.created_by = Some(ws.config.resolve_actor());
    issue.ephemeral = args.ephemeral;
    issue.labels = args.label.clone();
    issue.normalize();

    ws.storage().create_issue(&issue)?;
    ws.engine.flush_manager().mark_dirty(false);

    if json {
        println!("{}", serde_json::to_string_pretty(&issue)?);
    } else {
        println!("Created {id}: {}", issue.title);
    }

    ws.finish()
}

/// Wisp ids carry the `-wisp-` marker so they are recognizable even if
/// one leaks into a JSONL file.
fn next_wisp_id(ws: &Workspace) -> Result<String> {
    let stem = format!("{}-wisp", ws.config.prefix);
    let ids = ws.storage().all_ids()?;
    let start = ids
        .iter()
        .filter(|id| id.starts_with(&format!("{stem}-")))
        .filter_map(|id| id.rsplit('-').next().and_then(|n| n.parse::<u64>().ok()))
        .max()
        .unwrap_or(0)
        + 1;
    Ok(allocate_id(&stem, start, |candidate| {
        ids.iter().any(|id| id == candidate)
    }))
}
