//! `braid close` - close an issue.

use crate::cli::CloseArgs;
use crate::cli::commands::Workspace;
use crate::error::{BraidError, Result};
use crate::model::Status;
use chrono::Utc;

pub fn execute(args: &CloseArgs, json: bool) -> Result<()> {
    let ws = Workspace::open_synced()?;

    let mut issue = ws
        .storage()
        .get_issue(&args.id)?
        .ok_or_else(|| BraidError::IssueNotFound {
            id: args.id.clone(),
        })?;

    issue.status = Status::Closed;
    issue.closed_at = Some(Utc::now());
    issue.close_reason = args.reason.clone();
    issue.updated_at = Utc::now();
    ws.storage().put_issue(&issue)?;
    ws.engine.flush_manager().mark_dirty(false);

    if json {
        println!("{}", serde_json::to_string_pretty(&issue)?);
    } else {
        println!("Closed {}", issue.id);
    }

    ws.finish()
}
