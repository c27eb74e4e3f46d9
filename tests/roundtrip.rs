//! Round-trip and filtering properties of the export/import pair.

mod common;

use braid::model::{Dependency, DependencyKind, Status};
use braid::storage::Storage;
use braid::sync::importer::AutoImportOutcome;
use braid::sync::{SyncEngine, SyncOptions, hash_file};
use chrono::Utc;
use common::fixtures;
use std::sync::Arc;
use tempfile::TempDir;

fn engine_over(temp: &TempDir, storage: Arc<Storage>) -> SyncEngine {
    let mut options = SyncOptions::new(
        temp.path().join("issues.jsonl"),
        temp.path().to_path_buf(),
    );
    options.flush = braid::sync::FlushOptions {
        debounce: std::time::Duration::from_secs(600),
        max_coalesce: std::time::Duration::from_secs(1200),
    };
    SyncEngine::new(storage, &options)
}

/// Export into a fresh database and back: every non-ephemeral issue is
/// reconstructed field by field; wisps stay absent.
#[test]
fn export_import_roundtrip_preserves_issues() {
    let temp = TempDir::new().unwrap();
    let source = fixtures::engine(&temp);

    let mut alpha = fixtures::issue("test-1", "Alpha");
    alpha.description = Some("body\nwith newline".to_string());
    alpha.priority = braid::model::Priority::HIGH;
    alpha.labels = vec!["core".to_string(), "sync".to_string()];
    alpha
        .extra
        .insert("estimate".to_string(), serde_json::json!(120));

    let mut beta = fixtures::issue("test-2", "Beta");
    beta.status = Status::Closed;
    beta.closed_at = Some(beta.updated_at);
    beta.dependencies = vec![
        Dependency::new("test-2", "test-1", DependencyKind::Blocks),
        Dependency::new("test-2", "external:gh-7", DependencyKind::Related),
    ];

    let mut wisp = fixtures::issue("test-wisp-1", "Scratch");
    wisp.ephemeral = true;

    let storage = source.storage();
    storage.create_issue(&alpha).unwrap();
    storage.create_issue(&beta).unwrap();
    storage.create_issue(&wisp).unwrap();
    source.exporter().flush_incremental().unwrap();
    source.shutdown();

    // Fresh database, same file.
    let target = engine_over(&temp, Arc::new(Storage::open_memory().unwrap()));
    let AutoImportOutcome::Imported(summary) = target.importer().auto_import().unwrap() else {
        panic!("expected an import to run");
    };
    assert_eq!(summary.created, 2);

    let restored_alpha = target.storage().get_issue("test-1").unwrap().unwrap();
    assert_eq!(restored_alpha.title, alpha.title);
    assert_eq!(restored_alpha.description, alpha.description);
    assert_eq!(restored_alpha.priority, alpha.priority);
    assert_eq!(restored_alpha.labels, alpha.labels);
    assert_eq!(restored_alpha.created_at, alpha.created_at);
    assert_eq!(
        restored_alpha.extra.get("estimate").unwrap(),
        &serde_json::json!(120)
    );

    let restored_beta = target.storage().get_issue("test-2").unwrap().unwrap();
    assert_eq!(restored_beta.status, Status::Closed);
    assert!(restored_beta.closed_at.is_some());
    let targets: Vec<&str> = restored_beta
        .dependencies
        .iter()
        .map(|d| d.target_id.as_str())
        .collect();
    assert_eq!(targets, vec!["test-1", "external:gh-7"]);

    assert!(target.storage().get_issue("test-wisp-1").unwrap().is_none());
    target.shutdown();
}

/// Export idempotence: flushing twice with no intervening mutation
/// produces byte-identical file contents.
#[test]
fn export_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let engine = fixtures::engine(&temp);
    engine
        .storage()
        .create_issue(&fixtures::issue("test-1", "One"))
        .unwrap();

    engine.exporter().flush_incremental().unwrap();
    let first = std::fs::read(engine.exporter().jsonl_path()).unwrap();
    engine.exporter().flush_incremental().unwrap();
    let second = std::fs::read(engine.exporter().jsonl_path()).unwrap();
    assert_eq!(first, second);

    // A forced full export of the same state is also byte-identical.
    engine.exporter().flush_full_with(true).unwrap();
    let third = std::fs::read(engine.exporter().jsonl_path()).unwrap();
    assert_eq!(first, third);
    engine.shutdown();
}

/// Dirty-set discipline: ids dirtied after a flush snapshot remain dirty.
#[test]
fn late_dirty_ids_survive_flush() {
    let temp = TempDir::new().unwrap();
    let engine = fixtures::engine(&temp);
    let storage = engine.storage();

    storage.create_issue(&fixtures::issue("test-1", "One")).unwrap();
    engine.exporter().flush_incremental().unwrap();

    // Simulate a mutation landing between a flush's snapshot and its
    // clear: the clear names exactly the snapshot, so the late id stays.
    storage.create_issue(&fixtures::issue("test-2", "Late")).unwrap();
    storage
        .clear_dirty_issues(&["test-1".to_string()])
        .unwrap();
    assert_eq!(storage.dirty_issue_ids().unwrap(), vec!["test-2"]);
    engine.shutdown();
}

/// Prefix filtering: a non-primary worktree exports exactly the issues
/// whose identifier begins with its prefix.
#[test]
fn prefix_filtering_on_non_primary_worktree() {
    let temp = TempDir::new().unwrap();
    let engine = fixtures::engine_with_prefix_filter(&temp, Some("mine"));
    let storage = engine.storage();

    storage.create_issue(&fixtures::issue("mine-1", "Keep one")).unwrap();
    storage.create_issue(&fixtures::issue("mine-2", "Keep two")).unwrap();
    storage.create_issue(&fixtures::issue("other-1", "Foreign")).unwrap();

    engine.exporter().flush_incremental().unwrap();
    let lines = fixtures::file_lines(engine.exporter().jsonl_path());
    assert_eq!(lines.len(), 2);
    assert!(lines.iter().all(|line| line.contains("\"id\":\"mine-")));
    engine.shutdown();
}

/// Large records survive the round trip; the line scanner accepts lines
/// past 2 MiB.
#[test]
fn large_issue_round_trips() {
    let temp = TempDir::new().unwrap();
    let engine = fixtures::engine(&temp);

    let mut big = fixtures::issue("test-1", "Big");
    big.description = Some("d".repeat(2_500_000));
    engine.storage().create_issue(&big).unwrap();
    engine.exporter().flush_incremental().unwrap();
    engine.shutdown();

    let target = engine_over(&temp, Arc::new(Storage::open_memory().unwrap()));
    target.importer().auto_import().unwrap();
    let restored = target.storage().get_issue("test-1").unwrap().unwrap();
    assert_eq!(restored.description.unwrap().len(), 2_500_000);
    target.shutdown();
}

/// A tombstone colliding with a live issue remaps like any other record:
/// the live issue is untouched and the tombstone survives under its
/// fresh id.
#[test]
fn tombstone_collision_remaps() {
    let temp = TempDir::new().unwrap();
    let engine = fixtures::engine(&temp);
    let storage = engine.storage();

    storage.create_issue(&fixtures::issue("oss-1", "Alive")).unwrap();

    let mut dead = fixtures::issue("oss-1", "Deleted elsewhere");
    dead.created_at = Utc::now();
    dead.updated_at = dead.created_at;
    dead.status = Status::Tombstone;
    dead.closed_at = Some(dead.updated_at);
    dead.deleted_at = Some(dead.updated_at);
    std::fs::write(
        engine.exporter().jsonl_path(),
        format!("{}\n", fixtures::issue_line(&dead)),
    )
    .unwrap();

    let AutoImportOutcome::Imported(summary) = engine.importer().auto_import().unwrap() else {
        panic!("expected an import to run");
    };
    assert_eq!(summary.id_mapping.len(), 1);
    assert_eq!(storage.get_issue("oss-1").unwrap().unwrap().status, Status::Open);
    let remapped = storage.get_issue("oss-2").unwrap().unwrap();
    assert_eq!(remapped.status, Status::Tombstone);
    assert!(remapped.closed_at.is_some());
    engine.shutdown();
}

/// The exporter's hashes agree with an independent read of the file.
#[test]
fn stored_hashes_match_file() {
    let temp = TempDir::new().unwrap();
    let engine = fixtures::engine(&temp);
    engine
        .storage()
        .create_issue(&fixtures::issue("test-1", "One"))
        .unwrap();

    let report = engine.exporter().flush_incremental().unwrap();
    let observed = hash_file(engine.exporter().jsonl_path()).unwrap().unwrap();
    assert_eq!(report.content_hash, observed);
    engine.shutdown();
}
