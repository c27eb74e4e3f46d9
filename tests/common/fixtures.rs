//! Shared test fixtures.

use braid::model::Issue;
use braid::storage::Storage;
use braid::sync::{FlushOptions, SyncEngine, SyncOptions};
use chrono::{TimeZone, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A deterministic issue: fixed creation time and creator so identity
/// fingerprints are stable across runs.
#[must_use]
pub fn issue(id: &str, title: &str) -> Issue {
    let mut issue = Issue::new(id, title);
    issue.created_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    issue.updated_at = issue.created_at;
    issue.created_by = Some("tester".to_string());
    issue
}

/// An engine over an in-memory database and a JSONL file inside `temp`.
///
/// The flush worker's debounce is far beyond any test runtime: exports
/// happen only when a test drives them explicitly, so scheduling
/// decisions are observable without racing the worker.
#[must_use]
pub fn engine(temp: &TempDir) -> SyncEngine {
    engine_with_prefix_filter(temp, None)
}

#[must_use]
pub fn engine_with_prefix_filter(temp: &TempDir, prefix_filter: Option<&str>) -> SyncEngine {
    let storage = Arc::new(Storage::open_memory().unwrap());
    let mut options = SyncOptions::new(
        temp.path().join("issues.jsonl"),
        temp.path().to_path_buf(),
    );
    options.prefix_filter = prefix_filter.map(String::from);
    options.flush = FlushOptions {
        debounce: Duration::from_secs(600),
        max_coalesce: Duration::from_secs(1200),
    };
    SyncEngine::new(storage, &options)
}

/// File contents split into lines.
#[must_use]
pub fn file_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(String::from)
        .collect()
}

/// One serialized JSONL line for an issue.
#[must_use]
pub fn issue_line(issue: &Issue) -> String {
    serde_json::to_string(issue).unwrap()
}
