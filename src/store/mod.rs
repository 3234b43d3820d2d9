//! Document store seam
//!
//! The repository layer never talks to a database directly. Everything goes
//! through `DocumentStore`, which mirrors the capabilities of a remote
//! document database:
//!
//! - single-document get / add / set / delete
//! - native query and count
//! - batched writes committed atomically, capped per commit
//! - transactions where every read must precede every write
//!
//! `InMemoryStore` is a complete in-process implementation.

mod errors;
mod filter;
mod memory;

use serde_json::{Map, Value};

pub use errors::{StoreError, StoreResult, FAILED_PRECONDITION};
pub use filter::{compare_values, Direction, FilterExpr, FilterOperator, OrderSpec, QuerySpec};
pub use futures_util::future::BoxFuture;
pub use memory::{InMemoryStore, JournalEntry};

/// Stored document body, without its identifier
pub type DocumentData = Map<String, Value>;

/// One nested field write, addressed by path segments
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPath {
    pub segments: Vec<String>,
    pub value: Value,
}

impl FieldPath {
    pub fn new(segments: Vec<String>, value: Value) -> Self {
        Self { segments, value }
    }
}

/// Write each path into `target`. A single segment replaces the top-level
/// field; longer paths descend, creating (or replacing non-object)
/// intermediate values with objects.
pub fn apply_field_paths(target: &mut DocumentData, paths: &[FieldPath]) {
    for path in paths {
        set_path(target, &path.segments, path.value.clone());
    }
}

fn set_path(target: &mut Map<String, Value>, segments: &[String], value: Value) {
    match segments {
        [] => {}
        [leaf] => {
            target.insert(leaf.clone(), value);
        }
        [head, rest @ ..] => {
            let child = target
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                set_path(child, rest, value);
            }
        }
    }
}

/// A document read from the store
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: String,
    pub data: DocumentData,
}

impl Snapshot {
    pub fn new(id: impl Into<String>, data: DocumentData) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// Trait for the document store backend
pub trait DocumentStore: Send + Sync {
    /// Allocate a fresh document identifier without writing anything
    fn generate_id(&self) -> String;

    /// Read a document by ID
    fn get<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<Snapshot>>>;

    /// Insert a new document under a store-generated ID
    fn add<'a>(&'a self, collection: &'a str, data: DocumentData) -> BoxFuture<'a, StoreResult<String>>;

    /// Write a document. With `merge`, top-level keys are merged into the
    /// existing document; otherwise it is replaced.
    fn set<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        data: DocumentData,
        merge: bool,
    ) -> BoxFuture<'a, StoreResult<()>>;

    /// Delete a document; deleting a missing document succeeds
    fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> BoxFuture<'a, StoreResult<()>>;

    /// Run a query
    fn query<'a>(
        &'a self,
        collection: &'a str,
        spec: &'a QuerySpec,
    ) -> BoxFuture<'a, StoreResult<Vec<Snapshot>>>;

    /// Count documents matching the query filters
    fn count<'a>(&'a self, collection: &'a str, spec: &'a QuerySpec) -> BoxFuture<'a, StoreResult<usize>>;

    /// Open a write batch
    fn batch(&self) -> Box<dyn WriteBatch>;

    /// Open a native transaction
    fn begin_transaction(&self) -> Box<dyn TransactionHandle>;
}

/// A group of writes committed atomically
pub trait WriteBatch: Send {
    /// Stage a set (or merge-set)
    fn set(&mut self, collection: &str, id: &str, data: DocumentData, merge: bool);

    /// Stage a field-path update; the commit fails if the document is missing
    fn update(&mut self, collection: &str, id: &str, fields: Vec<FieldPath>);

    /// Stage a delete
    fn delete(&mut self, collection: &str, id: &str);

    /// Number of staged operations
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply every staged operation, all or nothing
    fn commit(self: Box<Self>) -> BoxFuture<'static, StoreResult<()>>;
}

/// A native transaction. Reads after the first staged write fail with
/// `StoreError::ReadAfterWrite`.
pub trait TransactionHandle: Send {
    /// Read a document within the transaction
    fn get<'a>(
        &'a mut self,
        collection: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, StoreResult<Option<Snapshot>>>;

    /// Stage a set (or merge-set)
    fn set(&mut self, collection: &str, id: &str, data: DocumentData, merge: bool) -> StoreResult<()>;

    /// Stage a field-path update; the commit fails if the document is missing
    fn update(&mut self, collection: &str, id: &str, fields: Vec<FieldPath>) -> StoreResult<()>;

    /// Stage a delete
    fn delete(&mut self, collection: &str, id: &str) -> StoreResult<()>;

    /// Commit atomically. Fails with `StoreError::Contention` if a document
    /// read by this transaction changed since it was read.
    fn commit(self: Box<Self>) -> BoxFuture<'static, StoreResult<()>>;
}
