//! `braid doctor` - workspace health checks.
//!
//! Read-only: reports what is wrong and how to fix it, never mutates.

use crate::cli::commands::Workspace;
use crate::error::Result;
use crate::model::Issue;
use crate::sync::{integrity, scan_conflict_markers};

#[derive(Debug)]
struct Finding {
    check: &'static str,
    problem: String,
    remedy: String,
}

pub fn execute(json: bool) -> Result<()> {
    let ws = Workspace::open()?;
    let mut findings = Vec::new();

    // File integrity against the last export.
    let outcome = integrity::check(ws.storage(), &ws.paths.jsonl_path)?;
    if outcome.requires_full_export() {
        findings.push(Finding {
            check: "file_integrity",
            problem: "JSONL file was modified outside the exporter".to_string(),
            remedy: "Run 'braid sync' to reconcile and rebuild".to_string(),
        });
    }

    // Unresolved merge conflicts.
    if ws.paths.jsonl_path.exists() {
        if let Some(line) = scan_conflict_markers(&ws.paths.jsonl_path)? {
            findings.push(Finding {
                check: "conflict_markers",
                problem: format!("git merge conflict markers at line {line}"),
                remedy: "Resolve the conflict, or re-export with 'braid sync --flush --full'"
                    .to_string(),
            });
        }
    }

    // Dangling dependency edges (reported, never synthesized or removed).
    let issues = ws.storage().all_issues()?;
    for dangling in dangling_dependencies(&issues) {
        findings.push(Finding {
            check: "dangling_dependency",
            problem: dangling,
            remedy: "Create the missing issue or remove the edge".to_string(),
        });
    }

    // Pending work.
    let dirty = ws.storage().dirty_issue_ids()?;
    if !dirty.is_empty() {
        findings.push(Finding {
            check: "dirty_issues",
            problem: format!("{} issue(s) awaiting export", dirty.len()),
            remedy: "Run 'braid sync --flush'".to_string(),
        });
    }

    if json {
        let entries: Vec<_> = findings
            .iter()
            .map(|f| {
                serde_json::json!({
                    "check": f.check,
                    "problem": f.problem,
                    "remedy": f.remedy,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::json!({ "healthy": findings.is_empty(), "findings": entries })
        );
    } else if findings.is_empty() {
        println!("Workspace is healthy.");
    } else {
        println!("Found {} problem(s):", findings.len());
        for finding in &findings {
            println!("  [{}] {}", finding.check, finding.problem);
            println!("      fix: {}", finding.remedy);
        }
    }

    ws.engine.shutdown();
    Ok(())
}

fn dangling_dependencies(issues: &[Issue]) -> Vec<String> {
    let known: std::collections::HashSet<&str> =
        issues.iter().map(|issue| issue.id.as_str()).collect();

    let mut dangling = Vec::new();
    for issue in issues {
        for dep in &issue.dependencies {
            if dep.is_external() {
                continue;
            }
            if !known.contains(dep.target_id.as_str()) {
                dangling.push(format!(
                    "{} depends on missing issue {}",
                    issue.id, dep.target_id
                ));
            }
        }
    }
    dangling
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Dependency, DependencyKind};

    #[test]
    fn test_dangling_dependencies_ignores_external() {
        let mut a = Issue::new("bd-1", "A");
        a.dependencies = vec![
            Dependency::new("bd-1", "bd-404", DependencyKind::Blocks),
            Dependency::new("bd-1", "external:gh-9", DependencyKind::Related),
        ];
        let b = Issue::new("bd-2", "B");

        let dangling = dangling_dependencies(&[a, b]);
        assert_eq!(dangling.len(), 1);
        assert!(dangling[0].contains("bd-404"));
    }
}
