//! Batch Limit Tests
//!
//! Tests for capped batch commits:
//! - Large inputs split into store-sized commits, in order
//! - A failed commit leaves earlier commits applied
//! - Query-scoped writes share the same cap

use std::sync::Arc;

use aerodoc::batch::{BatchReport, BatchWriter, WriteAction};
use aerodoc::{InMemoryStore, Patch, RepoError, Repository, RepositoryConfig};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Event {
    kind: String,
    seq: u32,
}

fn events(n: u32) -> Vec<serde_json::Value> {
    (0..n).map(|seq| json!({"kind": "click", "seq": seq})).collect()
}

// =============================================================================
// Chunking
// =============================================================================

/// 1200 creates at the default cap of 500 commit as 500, 500, 200.
#[tokio::test]
async fn test_bulk_create_chunking() {
    let store = InMemoryStore::new().with_journal();
    let repo: Repository<Event> = Repository::new(Arc::new(store.clone()), "events");

    let created = repo.bulk_create(&events(1200)).await.unwrap();

    assert_eq!(created.len(), 1200);
    assert_eq!(store.batch_commit_sizes(), vec![500, 500, 200]);
    assert_eq!(store.len("events"), 1200);
}

/// The writer itself reports what it committed.
#[tokio::test]
async fn test_writer_report() {
    let store = InMemoryStore::new().with_journal();
    let writer = BatchWriter::new(Arc::new(store.clone()), 500);
    let actions = (0..1000)
        .map(|i| {
            let body = json!({"kind": "view", "seq": i}).as_object().cloned().unwrap();
            WriteAction::set("events", format!("e{:04}", i), body)
        })
        .collect();

    let report = writer.commit(actions).await.unwrap();

    assert_eq!(report, BatchReport { commits: 2, operations: 1000 });
    assert_eq!(store.batch_commit_sizes(), vec![500, 500]);
}

/// Query-scoped updates go through the same capped writer.
#[tokio::test]
async fn test_query_update_uses_configured_cap() {
    let store = InMemoryStore::new().with_journal();
    let repo: Repository<Event> = Repository::new(Arc::new(store.clone()), "events")
        .with_config(RepositoryConfig::default().with_max_batch_operations(100))
        .unwrap();
    repo.bulk_create(&events(250)).await.unwrap();
    store.clear_journal();

    let updated = repo
        .query()
        .where_eq("kind", json!("click"))
        .update(Patch::new().set("kind", json!("tap")))
        .await
        .unwrap();

    assert_eq!(updated, 250);
    assert_eq!(store.batch_commit_sizes(), vec![100, 100, 50]);
    assert_eq!(repo.query().where_eq("kind", json!("tap")).count().await.unwrap(), 250);
}

// =============================================================================
// Partial Failure
// =============================================================================

/// Groups committed before a failure stay committed.
#[tokio::test]
async fn test_partial_failure_is_not_rolled_back() {
    let store = InMemoryStore::new().with_journal();
    store.fail_batch_commit_at(3);
    let repo: Repository<Event> = Repository::new(Arc::new(store.clone()), "events");

    let err = repo.bulk_create(&events(1200)).await.unwrap_err();

    assert!(matches!(err, RepoError::Store { .. }));
    assert_eq!(err.status_code(), 503);
    assert_eq!(store.batch_commit_sizes(), vec![500, 500]);
    assert_eq!(store.len("events"), 1000);
}
