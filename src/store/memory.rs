//! In-memory document store
//!
//! Behaves like the remote store it stands in for: ids are generated by the
//! store, batches apply all-or-nothing, transactions enforce read-before-write
//! and use optimistic version checks at commit. Every mutating call and every
//! commit is appended to a journal that callers can inspect.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use super::errors::{StoreError, StoreResult, FAILED_PRECONDITION};
use super::filter::{compare_values, Direction, QuerySpec};
use super::{
    apply_field_paths, BoxFuture, DocumentData, DocumentStore, FieldPath, Snapshot, TransactionHandle,
    WriteBatch,
};

/// One observable store interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    /// Direct (non-batched, non-transactional) write
    Write { collection: String, id: String },
    /// Batch commit with the number of operations it carried
    BatchCommit { operations: usize },
    /// Read through a transaction handle
    TransactionRead { collection: String, id: String },
    /// Write staged on a transaction handle
    TransactionWrite { collection: String, id: String },
    /// Transaction commit with the number of writes it applied
    TransactionCommit { writes: usize },
}

#[derive(Debug, Clone)]
struct StoredDocument {
    data: DocumentData,
    version: u64,
}

#[derive(Debug, Clone)]
enum StagedWrite {
    Set {
        collection: String,
        id: String,
        data: DocumentData,
        merge: bool,
    },
    Update {
        collection: String,
        id: String,
        fields: Vec<FieldPath>,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl StagedWrite {
    fn target(&self) -> (String, String) {
        match self {
            StagedWrite::Set { collection, id, .. }
            | StagedWrite::Update { collection, id, .. }
            | StagedWrite::Delete { collection, id } => (collection.clone(), id.clone()),
        }
    }
}

type Collections = HashMap<String, BTreeMap<String, StoredDocument>>;

#[derive(Debug, Default)]
struct State {
    collections: Collections,
    journaling: bool,
    journal: Vec<JournalEntry>,
    next_version: u64,
    batch_commits: usize,
    fail_batch_commit_at: Option<usize>,
    index_console: Option<String>,
    declared_indexes: Vec<Vec<String>>,
}

impl State {
    fn record(&mut self, entry: JournalEntry) {
        if self.journaling {
            self.journal.push(entry);
        }
    }

    fn version(&self, collection: &str, id: &str) -> Option<u64> {
        self.collections
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|d| d.version)
    }

    /// Apply writes all-or-nothing: a failing write leaves stored data untouched
    fn apply_all(&mut self, writes: Vec<StagedWrite>) -> StoreResult<()> {
        let mut scratch = self.collections.clone();
        for write in writes {
            self.next_version += 1;
            apply_write(&mut scratch, write, self.next_version)?;
        }
        self.collections = scratch;
        Ok(())
    }

    fn check_index(&self, collection: &str, spec: &QuerySpec) -> StoreResult<()> {
        let console = match &self.index_console {
            Some(console) => console,
            None => return Ok(()),
        };

        let fields = spec.fields();
        if fields.len() < 2 {
            return Ok(());
        }

        let mut wanted = fields.clone();
        wanted.sort();
        let declared = self.declared_indexes.iter().any(|index| {
            let mut index = index.clone();
            index.sort();
            index == wanted
        });
        if declared {
            return Ok(());
        }

        Err(StoreError::native(
            FAILED_PRECONDITION,
            format!(
                "The query requires an index. You can create it here: {}?collection={}&fields={}",
                console,
                collection,
                fields.join(",")
            ),
        ))
    }

    fn run_query(&self, collection: &str, spec: &QuerySpec) -> StoreResult<Vec<Snapshot>> {
        self.check_index(collection, spec)?;

        let mut results: Vec<Snapshot> = self
            .collections
            .get(collection)
            .map(|c| {
                c.iter()
                    .filter(|(_, doc)| spec.matches(&doc.data))
                    .map(|(id, doc)| Snapshot::new(id.clone(), doc.data.clone()))
                    .collect()
            })
            .unwrap_or_default();

        results.sort_by(|a, b| {
            for order in &spec.order {
                let left = a.data.get(&order.field).unwrap_or(&Value::Null);
                let right = b.data.get(&order.field).unwrap_or(&Value::Null);
                let ordering = compare_values(left, right).unwrap_or(std::cmp::Ordering::Equal);
                let ordering = match order.direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                };
                if ordering.is_ne() {
                    return ordering;
                }
            }
            a.id.cmp(&b.id)
        });

        if let Some(cursor) = &spec.start_after {
            let skip = match results.iter().position(|s| &s.id == cursor) {
                Some(pos) => pos + 1,
                None => results.iter().take_while(|s| &s.id <= cursor).count(),
            };
            results.drain(..skip);
        }

        if let Some(limit) = spec.limit {
            results.truncate(limit);
        }

        Ok(results)
    }
}

fn apply_write(collections: &mut Collections, write: StagedWrite, version: u64) -> StoreResult<()> {
    match write {
        StagedWrite::Set {
            collection,
            id,
            data,
            merge,
        } => {
            let coll = collections.entry(collection).or_default();
            let body = match (merge, coll.remove(&id)) {
                (true, Some(mut existing)) => {
                    for (k, v) in data {
                        existing.data.insert(k, v);
                    }
                    existing.data
                }
                _ => data,
            };
            coll.insert(id, StoredDocument { data: body, version });
        }
        StagedWrite::Update {
            collection,
            id,
            fields,
        } => {
            let stored = collections
                .get_mut(&collection)
                .and_then(|c| c.get_mut(&id))
                .ok_or_else(|| StoreError::Missing {
                    collection: collection.clone(),
                    id: id.clone(),
                })?;
            apply_field_paths(&mut stored.data, &fields);
            stored.version = version;
        }
        StagedWrite::Delete { collection, id } => {
            if let Some(coll) = collections.get_mut(&collection) {
                coll.remove(&id);
            }
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
}

impl Shared {
    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

/// In-memory store for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every interaction in the journal
    pub fn with_journal(self) -> Self {
        if let Ok(mut state) = self.shared.lock() {
            state.journaling = true;
        }
        self
    }

    /// Reject multi-field queries without a declared composite index, pointing
    /// callers at `console` to create one
    pub fn with_index_enforcement(self, console: impl Into<String>) -> Self {
        if let Ok(mut state) = self.shared.lock() {
            state.index_console = Some(console.into());
        }
        self
    }

    /// Declare a composite index over `fields`
    pub fn declare_index(&self, fields: &[&str]) {
        if let Ok(mut state) = self.shared.lock() {
            state
                .declared_indexes
                .push(fields.iter().map(|f| f.to_string()).collect());
        }
    }

    /// Make the `n`th batch commit (1-based, counted over the store's lifetime) fail
    pub fn fail_batch_commit_at(&self, n: usize) {
        if let Ok(mut state) = self.shared.lock() {
            state.fail_batch_commit_at = Some(n);
        }
    }

    /// Seed a document without recording a journal entry
    pub fn insert(&self, collection: &str, id: &str, document: Value) {
        if let (Ok(mut state), Some(data)) = (self.shared.lock(), document.as_object()) {
            state.next_version += 1;
            let version = state.next_version;
            let write = StagedWrite::Set {
                collection: collection.to_string(),
                id: id.to_string(),
                data: data.clone(),
                merge: false,
            };
            // A plain set cannot fail
            let _ = apply_write(&mut state.collections, write, version);
        }
    }

    /// Current body of a document
    pub fn document(&self, collection: &str, id: &str) -> Option<Value> {
        let state = self.shared.lock().ok()?;
        state
            .collections
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|d| Value::Object(d.data.clone()))
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: &str) -> usize {
        self.shared
            .lock()
            .ok()
            .and_then(|s| s.collections.get(collection).map(|c| c.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Every recorded interaction, oldest first
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.shared
            .lock()
            .map(|s| s.journal.clone())
            .unwrap_or_default()
    }

    pub fn clear_journal(&self) {
        if let Ok(mut state) = self.shared.lock() {
            state.journal.clear();
        }
    }

    /// Sizes of every batch commit, in commit order
    pub fn batch_commit_sizes(&self) -> Vec<usize> {
        self.journal()
            .into_iter()
            .filter_map(|e| match e {
                JournalEntry::BatchCommit { operations } => Some(operations),
                _ => None,
            })
            .collect()
    }

    /// Writes that reached stored data: direct writes, batch operations and
    /// committed transaction writes
    pub fn applied_write_count(&self) -> usize {
        self.journal()
            .into_iter()
            .map(|e| match e {
                JournalEntry::Write { .. } => 1,
                JournalEntry::BatchCommit { operations } => operations,
                JournalEntry::TransactionCommit { writes } => writes,
                _ => 0,
            })
            .sum()
    }

    /// Writes staged on transaction handles, committed or not
    pub fn staged_transaction_writes(&self) -> usize {
        self.journal()
            .iter()
            .filter(|e| matches!(e, JournalEntry::TransactionWrite { .. }))
            .count()
    }

    fn write_now(&self, write: StagedWrite) -> StoreResult<()> {
        let mut state = self.shared.lock()?;
        let (collection, id) = write.target();
        state.apply_all(vec![write])?;
        state.record(JournalEntry::Write { collection, id });
        Ok(())
    }
}

impl DocumentStore for InMemoryStore {
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    fn get<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<Snapshot>>> {
        Box::pin(async move {
            let state = self.shared.lock()?;
            Ok(state
                .collections
                .get(collection)
                .and_then(|c| c.get(id))
                .map(|d| Snapshot::new(id, d.data.clone())))
        })
    }

    fn add<'a>(&'a self, collection: &'a str, data: DocumentData) -> BoxFuture<'a, StoreResult<String>> {
        Box::pin(async move {
            let id = self.generate_id();
            self.write_now(StagedWrite::Set {
                collection: collection.to_string(),
                id: id.clone(),
                data,
                merge: false,
            })?;
            Ok(id)
        })
    }

    fn set<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        data: DocumentData,
        merge: bool,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.write_now(StagedWrite::Set {
                collection: collection.to_string(),
                id: id.to_string(),
                data,
                merge,
            })
        })
    }

    fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.write_now(StagedWrite::Delete {
                collection: collection.to_string(),
                id: id.to_string(),
            })
        })
    }

    fn query<'a>(
        &'a self,
        collection: &'a str,
        spec: &'a QuerySpec,
    ) -> BoxFuture<'a, StoreResult<Vec<Snapshot>>> {
        Box::pin(async move {
            let state = self.shared.lock()?;
            state.run_query(collection, spec)
        })
    }

    fn count<'a>(&'a self, collection: &'a str, spec: &'a QuerySpec) -> BoxFuture<'a, StoreResult<usize>> {
        Box::pin(async move {
            let state = self.shared.lock()?;
            let unbounded = QuerySpec {
                filters: spec.filters.clone(),
                ..QuerySpec::default()
            };
            Ok(state.run_query(collection, &unbounded)?.len())
        })
    }

    fn batch(&self) -> Box<dyn WriteBatch> {
        Box::new(MemoryBatch {
            shared: Arc::clone(&self.shared),
            writes: Vec::new(),
        })
    }

    fn begin_transaction(&self) -> Box<dyn TransactionHandle> {
        Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            reads: Vec::new(),
            writes: Vec::new(),
        })
    }
}

struct MemoryBatch {
    shared: Arc<Shared>,
    writes: Vec<StagedWrite>,
}

impl WriteBatch for MemoryBatch {
    fn set(&mut self, collection: &str, id: &str, data: DocumentData, merge: bool) {
        self.writes.push(StagedWrite::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
            merge,
        });
    }

    fn update(&mut self, collection: &str, id: &str, fields: Vec<FieldPath>) {
        self.writes.push(StagedWrite::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        });
    }

    fn delete(&mut self, collection: &str, id: &str) {
        self.writes.push(StagedWrite::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
    }

    fn len(&self) -> usize {
        self.writes.len()
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, StoreResult<()>> {
        let MemoryBatch { shared, writes } = *self;
        Box::pin(async move {
            let mut state = shared.lock()?;
            state.batch_commits += 1;
            if state.fail_batch_commit_at == Some(state.batch_commits) {
                return Err(StoreError::Unavailable(format!(
                    "batch commit {} rejected",
                    state.batch_commits
                )));
            }

            let operations = writes.len();
            state.apply_all(writes)?;
            state.record(JournalEntry::BatchCommit { operations });
            Ok(())
        })
    }
}

struct MemoryTransaction {
    shared: Arc<Shared>,
    /// (collection, id, version observed; `None` when absent)
    reads: Vec<(String, String, Option<u64>)>,
    writes: Vec<StagedWrite>,
}

impl MemoryTransaction {
    fn stage(&mut self, write: StagedWrite) -> StoreResult<()> {
        let (collection, id) = write.target();
        self.shared
            .lock()?
            .record(JournalEntry::TransactionWrite { collection, id });
        self.writes.push(write);
        Ok(())
    }
}

impl TransactionHandle for MemoryTransaction {
    fn get<'a>(
        &'a mut self,
        collection: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<Snapshot>>> {
        Box::pin(async move {
            if !self.writes.is_empty() {
                return Err(StoreError::ReadAfterWrite);
            }

            let mut state = self.shared.lock()?;
            state.record(JournalEntry::TransactionRead {
                collection: collection.to_string(),
                id: id.to_string(),
            });
            let stored = state.collections.get(collection).and_then(|c| c.get(id));
            let version = stored.map(|d| d.version);
            let snapshot = stored.map(|d| Snapshot::new(id, d.data.clone()));
            drop(state);

            self.reads.push((collection.to_string(), id.to_string(), version));
            Ok(snapshot)
        })
    }

    fn set(&mut self, collection: &str, id: &str, data: DocumentData, merge: bool) -> StoreResult<()> {
        self.stage(StagedWrite::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
            merge,
        })
    }

    fn update(&mut self, collection: &str, id: &str, fields: Vec<FieldPath>) -> StoreResult<()> {
        self.stage(StagedWrite::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        })
    }

    fn delete(&mut self, collection: &str, id: &str) -> StoreResult<()> {
        self.stage(StagedWrite::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        })
    }

    fn commit(self: Box<Self>) -> BoxFuture<'static, StoreResult<()>> {
        let MemoryTransaction {
            shared,
            reads,
            writes,
        } = *self;
        Box::pin(async move {
            let mut state = shared.lock()?;
            for (collection, id, observed) in &reads {
                if state.version(collection, id) != *observed {
                    return Err(StoreError::Contention(format!("{}/{}", collection, id)));
                }
            }

            let applied = writes.len();
            state.apply_all(writes)?;
            state.record(JournalEntry::TransactionCommit { writes: applied });
            Ok(())
        })
    }
}
