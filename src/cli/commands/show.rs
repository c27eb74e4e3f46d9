//! `braid show` - show issues in full.

use crate::cli::commands::Workspace;
use crate::error::{BraidError, Result};
use crate::model::Issue;

pub fn execute(ids: &[String], json: bool) -> Result<()> {
    let ws = Workspace::open_synced()?;

    let mut issues = Vec::new();
    for id in ids {
        let issue = ws
            .storage()
            .get_issue(id)?
            .ok_or_else(|| BraidError::IssueNotFound { id: id.clone() })?;
        issues.push(issue);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&issues)?);
    } else {
        for issue in &issues {
            print_issue(issue);
        }
    }

    ws.engine.shutdown();
    Ok(())
}

fn print_issue(issue: &Issue) {
    println!("{}: {}", issue.id, issue.title);
    println!("  status:   {}", issue.status);
    println!("  priority: {}", issue.priority);
    println!("  type:     {}", issue.issue_type);
    if let Some(assignee) = &issue.assignee {
        println!("  assignee: {assignee}");
    }
    if !issue.labels.is_empty() {
        println!("  labels:   {}", issue.labels.join(", "));
    }
    if let Some(description) = &issue.description {
        println!("  description: {description}");
    }
    for dep in &issue.dependencies {
        println!("  {} -> {}", dep.kind, dep.target_id);
    }
    println!("  created:  {}", issue.created_at.to_rfc3339());
    println!("  updated:  {}", issue.updated_at.to_rfc3339());
    if let Some(closed_at) = issue.closed_at {
        println!("  closed:   {}", closed_at.to_rfc3339());
    }
}
