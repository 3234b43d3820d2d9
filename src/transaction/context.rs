//! Transaction context
//!
//! The handle passed to a transaction callback. Reads go straight to the
//! store's transaction; writes are validated, pass their `before*` hooks and
//! are then queued. Nothing reaches the store handle until the callback has
//! returned and the coordinator flushes the queue, so every read precedes
//! every write.
//!
//! A context is in one of two states:
//!
//! - `Accepting`: reads are allowed while the queue is still empty; writes
//!   append to the queue
//! - `Flushed`: the queue has been handed to the store; any further call
//!   fails with `OrderingViolation`

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::trace;

use crate::batch::WriteAction;
use crate::errors::{RepoError, RepoResult};
use crate::hooks::{HookEvent, HookPayload, HookRegistry};
use crate::model::{Document, Entity, Patch};
use crate::repository::merge_snapshot;
use crate::store::{DocumentStore, Snapshot, StoreResult, TransactionHandle};
use crate::validation::ValidationGate;

/// Kind of a queued write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Update,
    Delete,
}

/// After-hook owed once the transaction commits
pub(crate) type PostCommit<T> = (HookEvent, HookPayload<T>);

struct QueuedWrite<T> {
    kind: WriteKind,
    action: WriteAction,
    after: PostCommit<T>,
}

enum ContextState<T> {
    Accepting { queue: Vec<QueuedWrite<T>> },
    Flushed,
}

/// Operations available inside `Repository::run_in_transaction`
pub struct TransactionContext<T> {
    collection: String,
    store: Arc<dyn DocumentStore>,
    handle: Box<dyn TransactionHandle>,
    gate: ValidationGate<T>,
    hooks: HookRegistry<T>,
    delimiter: char,
    /// Documents read in this transaction, by id
    seen: HashMap<String, Snapshot>,
    state: ContextState<T>,
}

impl<T: Entity> TransactionContext<T> {
    pub(crate) fn new(
        collection: String,
        store: Arc<dyn DocumentStore>,
        gate: ValidationGate<T>,
        hooks: HookRegistry<T>,
        delimiter: char,
    ) -> Self {
        let handle = store.begin_transaction();
        Self {
            collection,
            store,
            handle,
            gate,
            hooks,
            delimiter,
            seen: HashMap::new(),
            state: ContextState::Accepting { queue: Vec::new() },
        }
    }

    /// Number of writes queued so far
    pub fn queued(&self) -> usize {
        match &self.state {
            ContextState::Accepting { queue } => queue.len(),
            ContextState::Flushed => 0,
        }
    }

    /// Kinds of the queued writes, in call order
    pub fn queued_kinds(&self) -> Vec<WriteKind> {
        match &self.state {
            ContextState::Accepting { queue } => queue.iter().map(|w| w.kind).collect(),
            ContextState::Flushed => Vec::new(),
        }
    }

    /// Read a document through the transaction. Soft-deleted documents read
    /// as absent.
    ///
    /// # Errors
    ///
    /// `OrderingViolation` once any write has been queued.
    pub async fn get(&mut self, id: &str) -> RepoResult<Option<Document<T>>> {
        match self.read(id, "get").await? {
            Some(snapshot) => {
                let document = Document::from_snapshot(snapshot)?;
                Ok(if document.is_deleted() { None } else { Some(document) })
            }
            None => Ok(None),
        }
    }

    /// Validate, run `beforeCreate`, and queue an insert under a fresh id
    pub async fn create<D: Serialize + ?Sized>(&mut self, input: &D) -> RepoResult<Document<T>> {
        self.ensure_accepting("create")?;

        let input = serde_json::to_value(input)?;
        let document = Document::draft(self.gate.for_create(&input)?).with_id(self.store.generate_id());

        self.hooks
            .fire(HookEvent::BeforeCreate, HookPayload::Create { document: document.clone() })
            .await?;

        let action = WriteAction::set(self.collection.as_str(), document.id_str(), document.to_data()?);
        self.enqueue(
            WriteKind::Create,
            action,
            (HookEvent::AfterCreate, HookPayload::Create { document: document.clone() }),
        )?;
        Ok(document)
    }

    /// Validate, run `beforeUpdate`, and queue a field-path update.
    ///
    /// Returns the merged document when it was read earlier in this
    /// transaction. A document that does not exist at commit time fails the
    /// whole transaction with `NotFound`.
    pub async fn update(&mut self, id: &str, patch: Patch) -> RepoResult<Option<Document<T>>> {
        self.ensure_accepting("update")?;

        let expanded = self.gate.for_update(&patch.expand(self.delimiter)?)?;

        let merged = match self.seen.get(id) {
            Some(snapshot) => Some(merge_snapshot(&self.gate, snapshot.clone(), &expanded)?.document),
            None => None,
        };

        let payload = HookPayload::Update {
            id: id.to_string(),
            patch,
            document: merged.clone(),
        };
        self.hooks.fire(HookEvent::BeforeUpdate, payload.clone()).await?;

        let action = WriteAction::update(self.collection.as_str(), id, expanded.into_paths());
        self.enqueue(WriteKind::Update, action, (HookEvent::AfterUpdate, payload))?;
        Ok(merged)
    }

    /// Read the document, run `beforeDelete` with its snapshot, and queue the
    /// delete. Reading means this is only allowed before any other write.
    pub async fn delete(&mut self, id: &str) -> RepoResult<()> {
        let snapshot = self
            .read(id, "delete")
            .await?
            .ok_or_else(|| RepoError::not_found(self.collection.as_str(), id))?;
        let snapshot = Document::from_snapshot(snapshot)?;

        let payload = HookPayload::Delete {
            id: id.to_string(),
            snapshot,
        };
        self.hooks.fire(HookEvent::BeforeDelete, payload.clone()).await?;

        let action = WriteAction::delete(self.collection.as_str(), id);
        self.enqueue(WriteKind::Delete, action, (HookEvent::AfterDelete, payload))
    }

    /// Hand every queued write to the store handle, in call order, and return
    /// the after-hooks owed on commit.
    pub(crate) fn flush(&mut self) -> RepoResult<Vec<PostCommit<T>>> {
        let queue = match std::mem::replace(&mut self.state, ContextState::Flushed) {
            ContextState::Accepting { queue } => queue,
            ContextState::Flushed => return Err(RepoError::ordering("transaction already flushed")),
        };

        let mut post_commit = Vec::with_capacity(queue.len());
        for write in queue {
            write.action.stage(self.handle.as_mut())?;
            post_commit.push(write.after);
        }
        trace!(collection = %self.collection, writes = post_commit.len(), "transaction flushed");
        Ok(post_commit)
    }

    /// Commit the store transaction
    pub(crate) async fn commit(self) -> StoreResult<()> {
        self.handle.commit().await
    }

    async fn read(&mut self, id: &str, op: &str) -> RepoResult<Option<Snapshot>> {
        match &self.state {
            ContextState::Accepting { queue } if queue.is_empty() => {}
            ContextState::Accepting { queue } => {
                return Err(RepoError::ordering(format!(
                    "{} after {} queued write(s); all reads must come before any write",
                    op,
                    queue.len()
                )))
            }
            ContextState::Flushed => {
                return Err(RepoError::ordering(format!("{} after the transaction was flushed", op)))
            }
        }

        let snapshot = self.handle.get(&self.collection, id).await?;
        if let Some(snapshot) = &snapshot {
            self.seen.insert(id.to_string(), snapshot.clone());
        }
        Ok(snapshot)
    }

    fn ensure_accepting(&self, op: &str) -> RepoResult<()> {
        match self.state {
            ContextState::Accepting { .. } => Ok(()),
            ContextState::Flushed => Err(RepoError::ordering(format!(
                "{} after the transaction was flushed",
                op
            ))),
        }
    }

    fn enqueue(&mut self, kind: WriteKind, action: WriteAction, after: PostCommit<T>) -> RepoResult<()> {
        match &mut self.state {
            ContextState::Accepting { queue } => {
                queue.push(QueuedWrite { kind, action, after });
                Ok(())
            }
            ContextState::Flushed => Err(RepoError::ordering("write after the transaction was flushed")),
        }
    }
}
