//! Transaction Ordering Tests
//!
//! Tests for deferred-write transactions:
//! - Reads are rejected once a write is queued
//! - Queued writes reach the store only after the callback returns
//! - A failing callback leaves no trace
//! - After-hooks run only on commit, and cannot fail it
//! - Contention re-runs the whole callback

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use aerodoc::store::{DocumentStore, JournalEntry};
use aerodoc::{HookEvent, HookPayload, InMemoryStore, Patch, RepoError, Repository};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    owner: String,
    balance: i64,
}

fn bank() -> (InMemoryStore, Repository<Account>) {
    let store = InMemoryStore::new().with_journal();
    store.insert("accounts", "a", json!({"owner": "ann", "balance": 100, "deletedAt": null}));
    store.insert("accounts", "b", json!({"owner": "bob", "balance": 50, "deletedAt": null}));
    let repo = Repository::new(Arc::new(store.clone()), "accounts");
    (store, repo)
}

// =============================================================================
// Read/Write Ordering
// =============================================================================

/// A get after a queued create is an ordering violation, not a store error.
#[tokio::test]
async fn test_get_after_create_is_ordering_violation() {
    let (store, repo) = bank();
    store.clear_journal();

    let err = repo
        .run_in_transaction(|tx| {
            Box::pin(async move {
                let created = tx.create(&json!({"owner": "cy", "balance": 0})).await?;
                tx.get(created.id_str()).await?;
                Ok(())
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, RepoError::OrderingViolation(_)));
    assert_eq!(err.code(), "ORDERING_VIOLATION");
    assert_eq!(store.applied_write_count(), 0);
    assert_eq!(store.len("accounts"), 2);
}

/// Writes issued in the callback are queued; the store sees them all at once
/// after every read.
#[tokio::test]
async fn test_all_writes_follow_all_reads() {
    let (store, repo) = bank();
    store.clear_journal();
    let staged_during_callback = Arc::new(Mutex::new(Vec::new()));

    let probe = Arc::clone(&staged_during_callback);
    let observer = store.clone();
    repo.run_in_transaction(move |tx| {
        let probe = Arc::clone(&probe);
        let observer = observer.clone();
        Box::pin(async move {
            let a = tx.get("a").await?.ok_or_else(|| RepoError::not_found("accounts", "a"))?;
            let b = tx.get("b").await?.ok_or_else(|| RepoError::not_found("accounts", "b"))?;

            tx.update("a", Patch::new().set("balance", json!(a.data.balance - 10)))
                .await?;
            probe.lock().unwrap().push(observer.staged_transaction_writes());
            tx.create(&json!({"owner": "audit", "balance": b.data.balance}))
                .await?;
            probe.lock().unwrap().push(observer.staged_transaction_writes());
            Ok(())
        })
    })
    .await
    .unwrap();

    assert_eq!(*staged_during_callback.lock().unwrap(), vec![0, 0]);

    let journal = store.journal();
    let kinds: Vec<&str> = journal
        .iter()
        .map(|e| match e {
            JournalEntry::TransactionRead { .. } => "read",
            JournalEntry::TransactionWrite { .. } => "write",
            JournalEntry::TransactionCommit { .. } => "commit",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["read", "read", "write", "write", "commit"]);
    assert_eq!(journal.last(), Some(&JournalEntry::TransactionCommit { writes: 2 }));

    assert_eq!(store.document("accounts", "a").unwrap()["balance"], 90);
    assert_eq!(store.len("accounts"), 3);
}

/// Delete reads its target, so it obeys the same rule as get.
#[tokio::test]
async fn test_delete_after_write_is_ordering_violation() {
    let (store, repo) = bank();

    let err = repo
        .run_in_transaction(|tx| {
            Box::pin(async move {
                tx.update("a", Patch::new().set("balance", json!(0))).await?;
                tx.delete("b").await?;
                Ok(())
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, RepoError::OrderingViolation(_)));
    assert!(store.document("accounts", "b").is_some());
    assert_eq!(store.document("accounts", "a").unwrap()["balance"], 100);
}

/// Reads in any order before writes are fine, including a delete.
#[tokio::test]
async fn test_delete_then_create_commits() {
    let (store, repo) = bank();

    let id = repo
        .run_in_transaction(|tx| {
            Box::pin(async move {
                let a = tx.get("a").await?;
                tx.delete("b").await?;
                let created = tx
                    .create(&json!({"owner": "merged", "balance": a.map(|d| d.data.balance).unwrap_or(0) + 50}))
                    .await?;
                Ok(created.id.unwrap_or_default())
            })
        })
        .await
        .unwrap();

    assert!(store.document("accounts", "b").is_none());
    assert_eq!(store.document("accounts", &id).unwrap()["balance"], 150);
}

// =============================================================================
// Rollback
// =============================================================================

/// A callback error after queued writes applies nothing and fires no after-hooks.
#[tokio::test]
async fn test_callback_error_rolls_back_everything() {
    let (store, repo) = bank();
    let after_hooks = Arc::new(AtomicUsize::new(0));
    for event in [HookEvent::AfterCreate, HookEvent::AfterUpdate] {
        let after_hooks = Arc::clone(&after_hooks);
        repo.on(event, move |_| {
            let after_hooks = Arc::clone(&after_hooks);
            async move {
                after_hooks.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
    }
    store.clear_journal();

    let err = repo
        .run_in_transaction(|tx| {
            Box::pin(async move {
                tx.update("a", Patch::new().set("balance", json!(0))).await?;
                tx.create(&json!({"owner": "x", "balance": 1})).await?;
                Err::<(), _>(RepoError::conflict("insufficient funds"))
            })
        })
        .await
        .unwrap_err();

    assert_eq!(err, RepoError::conflict("insufficient funds"));
    assert_eq!(after_hooks.load(Ordering::SeqCst), 0);
    assert_eq!(store.staged_transaction_writes(), 0);
    assert_eq!(store.applied_write_count(), 0);
    assert_eq!(store.document("accounts", "a").unwrap()["balance"], 100);
}

/// A before-hook rejecting a transactional write aborts the transaction.
#[tokio::test]
async fn test_before_hook_error_aborts_transaction() {
    let (store, repo) = bank();
    repo.on(HookEvent::BeforeUpdate, |payload| async move {
        match payload {
            HookPayload::Update { id, .. } if id == "b" => Err(RepoError::conflict("b is frozen")),
            _ => Ok(()),
        }
    });

    let err = repo
        .run_in_transaction(|tx| {
            Box::pin(async move {
                tx.update("a", Patch::new().set("balance", json!(1))).await?;
                tx.update("b", Patch::new().set("balance", json!(1))).await?;
                Ok(())
            })
        })
        .await
        .unwrap_err();

    assert_eq!(err, RepoError::conflict("b is frozen"));
    assert_eq!(store.document("accounts", "a").unwrap()["balance"], 100);
}

// =============================================================================
// After-Hook Isolation
// =============================================================================

/// A failing after-hook is logged; the commit stands and later hooks still run.
#[tokio::test]
async fn test_after_hook_failure_is_isolated() {
    let (store, repo) = bank();
    let delivered = Arc::new(Mutex::new(Vec::new()));

    repo.on(HookEvent::AfterCreate, |_| async {
        Err(RepoError::conflict("mailer offline"))
    });
    let sink = Arc::clone(&delivered);
    repo.on(HookEvent::AfterUpdate, move |payload| {
        let sink = Arc::clone(&sink);
        async move {
            if let HookPayload::Update { id, .. } = payload {
                sink.lock().unwrap().push(id);
            }
            Ok(())
        }
    });

    repo.run_in_transaction(|tx| {
        Box::pin(async move {
            tx.create(&json!({"owner": "new", "balance": 5})).await?;
            tx.update("a", Patch::new().set("balance", json!(95))).await?;
            Ok(())
        })
    })
    .await
    .unwrap();

    assert_eq!(store.len("accounts"), 3);
    assert_eq!(store.document("accounts", "a").unwrap()["balance"], 95);
    assert_eq!(*delivered.lock().unwrap(), vec!["a".to_string()]);
}

/// Before-hooks fire at call time, after-hooks only once the commit lands.
#[tokio::test]
async fn test_hook_timing() {
    let (_store, repo) = bank();
    let timeline = Arc::new(Mutex::new(Vec::new()));

    for (event, tag) in [(HookEvent::BeforeUpdate, "before"), (HookEvent::AfterUpdate, "after")] {
        let timeline = Arc::clone(&timeline);
        repo.on(event, move |_| {
            let timeline = Arc::clone(&timeline);
            async move {
                timeline.lock().unwrap().push(tag.to_string());
                Ok(())
            }
        });
    }

    let marks = Arc::clone(&timeline);
    repo.run_in_transaction(move |tx| {
        let marks = Arc::clone(&marks);
        Box::pin(async move {
            tx.update("a", Patch::new().set("balance", json!(1))).await?;
            marks.lock().unwrap().push("callback done".to_string());
            Ok(())
        })
    })
    .await
    .unwrap();

    assert_eq!(
        *timeline.lock().unwrap(),
        vec!["before".to_string(), "callback done".to_string(), "after".to_string()]
    );
}

// =============================================================================
// Contention
// =============================================================================

/// Losing an optimistic check re-runs the callback against fresh reads.
#[tokio::test]
async fn test_contention_reruns_callback() {
    let (store, repo) = bank();
    let attempts = Arc::new(AtomicUsize::new(0));

    let seen = repo
        .run_in_transaction(|tx| {
            let attempts = Arc::clone(&attempts);
            let rival = store.clone();
            Box::pin(async move {
                let a = tx.get("a").await?.ok_or_else(|| RepoError::not_found("accounts", "a"))?;
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    let body = json!({"balance": 40}).as_object().cloned().unwrap_or_default();
                    rival.set("accounts", "a", body, true).await?;
                }
                tx.update("a", Patch::new().set("balance", json!(a.data.balance - 10)))
                    .await?;
                Ok(a.data.balance)
            })
        })
        .await
        .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(seen, 40);
    assert_eq!(store.document("accounts", "a").unwrap()["balance"], 30);
}
