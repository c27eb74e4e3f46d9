//! `braid update` - update issue fields.

use crate::cli::UpdateArgs;
use crate::cli::commands::Workspace;
use crate::error::{BraidError, Result};
use chrono::Utc;
use std::str::FromStr;

pub fn execute(args: &UpdateArgs, json: bool) -> Result<()> {
    let ws = Workspace::open_synced()?;

    let mut issue = ws
        .storage()
        .get_issue(&args.id)?
        .ok_or_else(|| BraidError::IssueNotFound {
            id: args.id.clone(),
        })?;

    if let Some(title) = &args.title {
        if title.trim().is_empty() {
            return Err(BraidError::validation("title", "cannot be empty"));
        }
        issue.title = title.trim().to_string();
    }
    if let Some(description) = &args.description {
        issue.description = Some(description.clone());
    }
    if let Some(status) = &args.status {
        issue.status = FromStr::from_str(status)?;
    }
    if let Some(priority) = &args.priority {
        issue.priority = FromStr::from_str(priority)?;
    }
    if let Some(assignee) = &args.assignee {
        issue.assignee = Some(assignee.clone());
    }

    issue.updated_at = Utc::now();
    issue.normalize();
    ws.storage().put_issue(&issue)?;
    ws.engine.flush_manager().mark_dirty(false);

    if json {
        println!("{}", serde_json::to_string_pretty(&issue)?);
    } else {
        println!("Updated {}", issue.id);
    }

    ws.finish()
}
