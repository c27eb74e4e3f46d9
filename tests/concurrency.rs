//! Concurrent mutation against a running flush worker.

mod common;

use braid::storage::Storage;
use braid::sync::{FlushOptions, SyncEngine, SyncOptions};
use common::fixtures;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn engine_with_fast_flush(temp: &TempDir) -> SyncEngine {
    let storage = Arc::new(Storage::open_memory().unwrap());
    let mut options = SyncOptions::new(
        temp.path().join("issues.jsonl"),
        temp.path().to_path_buf(),
    );
    options.flush = FlushOptions {
        debounce: Duration::from_millis(20),
        max_coalesce: Duration::from_millis(200),
    };
    SyncEngine::new(storage, &options)
}

/// Writers on several threads race the flush worker; shutdown guarantees
/// everything still lands in the file exactly once.
#[test]
fn concurrent_writers_all_reach_the_file() {
    let temp = TempDir::new().unwrap();
    let engine = Arc::new(engine_with_fast_flush(&temp));

    let mut handles = Vec::new();
    for worker in 0..4 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..10 {
                let id = format!("test-{}", worker * 10 + i + 1);
                engine
                    .storage()
                    .create_issue(&fixtures::issue(&id, "Concurrent"))
                    .unwrap();
                engine.flush_manager().mark_dirty(false);
                thread::sleep(Duration::from_millis(3));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    engine.shutdown();

    let lines = fixtures::file_lines(&temp.path().join("issues.jsonl"));
    assert_eq!(lines.len(), 40);
    // Every id appears exactly once, in sorted order.
    let mut ids: Vec<String> = lines
        .iter()
        .map(|line| {
            serde_json::from_str::<serde_json::Value>(line).unwrap()["id"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    let sorted = ids.clone();
    ids.sort();
    assert_eq!(ids, sorted);
    ids.dedup();
    assert_eq!(ids.len(), 40);

    assert!(engine.storage().dirty_issue_ids().unwrap().is_empty());
}

/// Closing the storage while the worker is live degrades to a no-op
/// rather than an error storm.
#[test]
fn close_during_activity_is_safe() {
    let temp = TempDir::new().unwrap();
    let engine = Arc::new(engine_with_fast_flush(&temp));

    engine
        .storage()
        .create_issue(&fixtures::issue("test-1", "One"))
        .unwrap();
    engine.flush_manager().mark_dirty(false);
    engine.storage().close();

    thread::sleep(Duration::from_millis(100));
    assert_eq!(engine.flush_manager().consecutive_failures(), 0);
    engine.shutdown();
}
