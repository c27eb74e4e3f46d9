//! `braid list` - list issues.

use crate::cli::ListArgs;
use crate::cli::commands::Workspace;
use crate::error::Result;
use std::str::FromStr;

pub fn execute(args: &ListArgs, json: bool) -> Result<()> {
    let ws = Workspace::open_synced()?;

    let status = args.status.as_deref().map(FromStr::from_str).transpose()?;
    let issues = ws.storage().list_issues(status)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&issues)?);
    } else if issues.is_empty() {
        println!("No issues found.");
    } else {
        for issue in &issues {
            let labels = if issue.labels.is_empty() {
                String::new()
            } else {
                format!(" [{}]", issue.labels.join(", "))
            };
            println!(
                "{:<12} {:<12} {} {}{}",
                issue.id, issue.status, issue.priority, issue.title, labels
            );
        }
    }

    ws.engine.shutdown();
    Ok(())
}
