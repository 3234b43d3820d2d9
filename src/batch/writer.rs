//! Chunked batch commits
//!
//! Write actions are applied to an open batch in input order. When the batch
//! reaches the store's per-commit cap it is committed and a fresh one opened;
//! whatever remains at the end is committed last. Commits are strictly
//! sequential.
//!
//! Groups are atomic individually, not collectively: if commit `k` fails,
//! groups `1..k` stay applied and the error is returned as-is.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::RepoResult;
use crate::store::{DocumentData, DocumentStore, FieldPath, StoreResult, TransactionHandle, WriteBatch};

/// One store operation destined for a batch
#[derive(Debug, Clone, PartialEq)]
pub enum WriteAction {
    /// Replace (or, with `merge`, merge into) a document
    Set {
        collection: String,
        id: String,
        data: DocumentData,
        merge: bool,
    },
    /// Field-path update of an existing document
    Update {
        collection: String,
        id: String,
        fields: Vec<FieldPath>,
    },
    /// Remove a document
    Delete { collection: String, id: String },
}

impl WriteAction {
    /// Full-document write
    pub fn set(collection: impl Into<String>, id: impl Into<String>, data: DocumentData) -> Self {
        Self::Set {
            collection: collection.into(),
            id: id.into(),
            data,
            merge: false,
        }
    }

    /// Top-level merge into an existing document
    pub fn merge(collection: impl Into<String>, id: impl Into<String>, data: DocumentData) -> Self {
        Self::Set {
            collection: collection.into(),
            id: id.into(),
            data,
            merge: true,
        }
    }

    pub fn update(collection: impl Into<String>, id: impl Into<String>, fields: Vec<FieldPath>) -> Self {
        Self::Update {
            collection: collection.into(),
            id: id.into(),
            fields,
        }
    }

    pub fn delete(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Delete {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Document the action targets
    pub fn id(&self) -> &str {
        match self {
            Self::Set { id, .. } | Self::Update { id, .. } | Self::Delete { id, .. } => id,
        }
    }

    /// Register this action on an open batch
    pub fn apply(self, batch: &mut dyn WriteBatch) {
        match self {
            Self::Set {
                collection,
                id,
                data,
                merge,
            } => batch.set(&collection, &id, data, merge),
            Self::Update {
                collection,
                id,
                fields,
            } => batch.update(&collection, &id, fields),
            Self::Delete { collection, id } => batch.delete(&collection, &id),
        }
    }

    /// Stage this action on a transaction handle
    pub fn stage(self, handle: &mut dyn TransactionHandle) -> StoreResult<()> {
        match self {
            Self::Set {
                collection,
                id,
                data,
                merge,
            } => handle.set(&collection, &id, data, merge),
            Self::Update {
                collection,
                id,
                fields,
            } => handle.update(&collection, &id, fields),
            Self::Delete { collection, id } => handle.delete(&collection, &id),
        }
    }
}

/// Outcome of a successful `BatchWriter::commit`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Commits issued
    pub commits: usize,
    /// Actions applied across all commits
    pub operations: usize,
}

/// Commits write actions in groups no larger than the store's cap
#[derive(Clone)]
pub struct BatchWriter {
    store: Arc<dyn DocumentStore>,
    max_operations: usize,
}

impl BatchWriter {
    /// Create a writer. A cap of zero is treated as one.
    pub fn new(store: Arc<dyn DocumentStore>, max_operations: usize) -> Self {
        Self {
            store,
            max_operations: max_operations.max(1),
        }
    }

    pub fn max_operations(&self) -> usize {
        self.max_operations
    }

    /// Apply every action, committing whenever the open batch is full.
    ///
    /// # Errors
    ///
    /// The first failed commit is returned immediately. Groups committed
    /// before it are not rolled back.
    pub async fn commit(&self, actions: Vec<WriteAction>) -> RepoResult<BatchReport> {
        let mut report = BatchReport::default();
        let mut batch = self.store.batch();

        for action in actions {
            action.apply(batch.as_mut());
            if batch.len() >= self.max_operations {
                let full = std::mem::replace(&mut batch, self.store.batch());
                self.commit_group(full, &mut report).await?;
            }
        }

        if !batch.is_empty() {
            self.commit_group(batch, &mut report).await?;
        }

        Ok(report)
    }

    async fn commit_group(&self, batch: Box<dyn WriteBatch>, report: &mut BatchReport) -> RepoResult<()> {
        let operations = batch.len();
        match batch.commit().await {
            Ok(()) => {
                report.commits += 1;
                report.operations += operations;
                debug!(commit = report.commits, operations, "batch committed");
                Ok(())
            }
            Err(e) => {
                warn!(
                    committed_groups = report.commits,
                    committed_operations = report.operations,
                    error = %e,
                    "batch commit failed; earlier groups remain applied"
                );
                Err(e.into())
            }
        }
    }
}
