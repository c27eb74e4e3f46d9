//! `braid delete` - delete an issue.
//!
//! The default leaves a tombstone so the deletion propagates through the
//! JSONL file to other clones; `--hard` removes the row entirely.

use crate::cli::DeleteArgs;
use crate::cli::commands::Workspace;
use crate::error::{BraidError, Result};
use crate::model::Status;
use chrono::Utc;

pub fn execute(args: &DeleteArgs, json: bool) -> Result<()> {
    let ws = Workspace::open_synced()?;

    if args.hard {
        if !ws.storage().delete_issue(&args.id)? {
            return Err(BraidError::IssueNotFound {
                id: args.id.clone(),
            });
        }
        ws.engine.flush_manager().mark_dirty(false);
        if json {
            println!("{}", serde_json::json!({ "deleted": args.id, "hard": true }));
        } else {
            println!("Deleted {} (hard)", args.id);
        }
        return ws.finish();
    }

    let mut issue = ws
        .storage()
        .get_issue(&args.id)?
        .ok_or_else(|| BraidError::IssueNotFound {
            id: args.id.clone(),
        })?;

    let now = Utc::now();
    issue.status = Status::Tombstone;
    issue.closed_at = Some(now);
    issue.deleted_at = Some(now);
    issue.updated_at = now;
    ws.storage().put_issue(&issue)?;
    ws.engine.flush_manager().mark_dirty(false);

    if json {
        println!("{}", serde_json::json!({ "deleted": args.id, "hard": false }));
    } else {
        println!("Deleted {} (tombstone)", args.id);
    }

    ws.finish()
}
