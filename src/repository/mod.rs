//! # Repository
//!
//! Typed CRUD over one collection. Every write follows the same pipeline:
//!
//! 1. read whatever the operation needs (existence, snapshot)
//! 2. validate the input through the `ValidationGate`
//! 3. fire the `before*` hooks; any error aborts with nothing written
//! 4. write to the store
//! 5. fire the `after*` hooks
//!
//! Soft-deleted documents stay in the store with a `deletedAt` stamp and are
//! hidden from reads unless the caller opts in.

mod bulk;

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use futures_util::future::try_join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::batch::BatchWriter;
use crate::config::RepositoryConfig;
use crate::errors::{RepoError, RepoResult};
use crate::hooks::{HookEvent, HookPayload, HookRegistry};
use crate::model::{Document, Entity, ExpandedPatch, Patch, DELETED_AT_FIELD};
use crate::query::QueryBuilder;
use crate::store::{DocumentData, DocumentStore, FilterExpr, QuerySpec, Snapshot};
use crate::validation::{ValidationGate, Validator};

/// Current time as the soft-delete stamp format
pub(crate) fn deletion_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Body of a merge-write that sets (or clears) the soft-delete stamp
pub(crate) fn stamp_data(stamp: Option<&str>) -> DocumentData {
    let mut data = Map::new();
    data.insert(
        DELETED_AT_FIELD.to_string(),
        stamp.map(|s| Value::String(s.to_string())).unwrap_or(Value::Null),
    );
    data
}

/// Filter selecting active documents
pub(crate) fn active_filter() -> FilterExpr {
    FilterExpr::eq(DELETED_AT_FIELD, Value::Null)
}

/// Filter selecting soft-deleted documents
pub(crate) fn deleted_filter() -> FilterExpr {
    FilterExpr::neq(DELETED_AT_FIELD, Value::Null)
}

/// Repository for entities of type `T` in one collection
pub struct Repository<T> {
    collection: String,
    store: Arc<dyn DocumentStore>,
    config: RepositoryConfig,
    gate: ValidationGate<T>,
    hooks: HookRegistry<T>,
    batch: BatchWriter,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            gate: self.gate.clone(),
            hooks: self.hooks.clone(),
            batch: self.batch.clone(),
        }
    }
}

impl<T: Entity> Repository<T> {
    /// Repository with default configuration and no schema
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        let config = RepositoryConfig::default();
        Self {
            collection: collection.into(),
            batch: BatchWriter::new(Arc::clone(&store), config.max_batch_operations),
            store,
            config,
            gate: ValidationGate::pass_through(),
            hooks: HookRegistry::new(),
        }
    }

    /// Validate input with `validator` before it is decoded
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.gate = ValidationGate::new(validator);
        self
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: RepositoryConfig) -> RepoResult<Self> {
        config.validate()?;
        self.batch = BatchWriter::new(Arc::clone(&self.store), config.max_batch_operations);
        self.config = config;
        Ok(self)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Hook table shared by this repository, its clones, queries and transactions
    pub fn hooks(&self) -> &HookRegistry<T> {
        &self.hooks
    }

    /// Register a lifecycle hook
    pub fn on<F, Fut>(&self, event: HookEvent, hook: F)
    where
        F: Fn(HookPayload<T>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = RepoResult<()>> + Send + 'static,
    {
        self.hooks.register(event, hook);
    }

    /// Start a query over this collection
    pub fn query(&self) -> QueryBuilder<T> {
        QueryBuilder::new(self.clone())
    }

    pub(crate) fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub(crate) fn gate(&self) -> &ValidationGate<T> {
        &self.gate
    }

    pub(crate) fn batch_writer(&self) -> &BatchWriter {
        &self.batch
    }

    /// Validate and insert a new document under a store-generated id
    ///
    /// # Errors
    ///
    /// `Validation` if the input is rejected; any `beforeCreate` hook error.
    pub async fn create<D: Serialize + ?Sized>(&self, input: &D) -> RepoResult<Document<T>> {
        let input = serde_json::to_value(input)?;
        let draft = Document::draft(self.gate.for_create(&input)?);

        self.hooks
            .fire(HookEvent::BeforeCreate, HookPayload::Create { document: draft.clone() })
            .await?;

        let id = self.store.add(&self.collection, draft.to_data()?).await?;
        let created = draft.with_id(id);
        debug!(collection = %self.collection, id = created.id_str(), "document created");

        self.hooks
            .fire(HookEvent::AfterCreate, HookPayload::Create { document: created.clone() })
            .await?;
        Ok(created)
    }

    /// Fetch by id. Soft-deleted documents are returned only with `include_deleted`.
    pub async fn get_by_id(&self, id: &str, include_deleted: bool) -> RepoResult<Option<Document<T>>> {
        match self.store.get(&self.collection, id).await? {
            Some(snapshot) => {
                let document = Document::from_snapshot(snapshot)?;
                if document.is_deleted() && !include_deleted {
                    Ok(None)
                } else {
                    Ok(Some(document))
                }
            }
            None => Ok(None),
        }
    }

    /// Whether an active document with this id exists
    pub async fn exists(&self, id: &str) -> RepoResult<bool> {
        Ok(self.get_by_id(id, false).await?.is_some())
    }

    /// Number of active documents
    pub async fn count(&self) -> RepoResult<usize> {
        let spec = QuerySpec {
            filters: vec![active_filter()],
            ..QuerySpec::default()
        };
        Ok(self.store.count(&self.collection, &spec).await?)
    }

    /// Apply a partial update. Delimited keys (`address.city`) merge into
    /// nested objects; plain keys replace the field.
    ///
    /// # Errors
    ///
    /// `NotFound` before any validation; `Validation` for malformed paths or
    /// rejected values; any `beforeUpdate` hook error.
    pub async fn update(&self, id: &str, patch: Patch) -> RepoResult<Document<T>> {
        let snapshot = self.require(id).await?;
        let expanded = self.gate.for_update(&patch.expand(self.config.path_delimiter)?)?;
        let Merged { document: merged, data } = self.merge(snapshot, &expanded)?;

        self.hooks
            .fire(
                HookEvent::BeforeUpdate,
                HookPayload::Update {
                    id: id.to_string(),
                    patch: patch.clone(),
                    document: Some(merged.clone()),
                },
            )
            .await?;

        self.store.set(&self.collection, id, data, true).await?;
        debug!(collection = %self.collection, id, "document updated");

        self.hooks
            .fire(
                HookEvent::AfterUpdate,
                HookPayload::Update {
                    id: id.to_string(),
                    patch,
                    document: Some(merged.clone()),
                },
            )
            .await?;
        Ok(merged)
    }

    /// Remove a document permanently
    pub async fn delete(&self, id: &str) -> RepoResult<()> {
        let snapshot = Document::from_snapshot(self.require(id).await?)?;

        self.hooks
            .fire(
                HookEvent::BeforeDelete,
                HookPayload::Delete {
                    id: id.to_string(),
                    snapshot: snapshot.clone(),
                },
            )
            .await?;

        self.store.delete(&self.collection, id).await?;
        debug!(collection = %self.collection, id, "document deleted");

        self.hooks
            .fire(
                HookEvent::AfterDelete,
                HookPayload::Delete {
                    id: id.to_string(),
                    snapshot,
                },
            )
            .await
    }

    /// Stamp `deletedAt` with the current time
    pub async fn soft_delete(&self, id: &str) -> RepoResult<Document<T>> {
        let mut document = Document::from_snapshot(self.require(id).await?)?;
        let stamp = deletion_stamp();

        self.hooks
            .fire(
                HookEvent::BeforeSoftDelete,
                HookPayload::SoftDelete {
                    id: id.to_string(),
                    deleted_at: stamp.clone(),
                },
            )
            .await?;

        self.store
            .set(&self.collection, id, stamp_data(Some(&stamp)), true)
            .await?;
        document.deleted_at = Some(stamp.clone());

        self.hooks
            .fire(
                HookEvent::AfterSoftDelete,
                HookPayload::SoftDelete {
                    id: id.to_string(),
                    deleted_at: stamp,
                },
            )
            .await?;
        Ok(document)
    }

    /// Clear `deletedAt`. Restoring an active document succeeds without change.
    pub async fn restore(&self, id: &str) -> RepoResult<Document<T>> {
        let mut document = Document::from_snapshot(self.require(id).await?)?;
        if !document.is_deleted() {
            return Ok(document);
        }

        let payload = HookPayload::Restore { id: id.to_string() };
        self.hooks.fire(HookEvent::BeforeRestore, payload.clone()).await?;

        self.store
            .set(&self.collection, id, stamp_data(None), true)
            .await?;
        document.deleted_at = None;

        self.hooks.fire(HookEvent::AfterRestore, payload).await?;
        Ok(document)
    }

    /// Update the document if it exists, otherwise create it under `id`
    pub async fn upsert<D: Serialize + ?Sized>(&self, id: &str, input: &D) -> RepoResult<Document<T>> {
        let input = serde_json::to_value(input)?;
        if self.store.get(&self.collection, id).await?.is_some() {
            return self.update(id, Patch::from_value(input)?).await;
        }

        let draft = Document::draft(self.gate.for_create(&input)?).with_id(id);
        self.hooks
            .fire(HookEvent::BeforeCreate, HookPayload::Create { document: draft.clone() })
            .await?;

        self.store
            .set(&self.collection, id, draft.to_data()?, false)
            .await?;
        debug!(collection = %self.collection, id, "document created by upsert");

        self.hooks
            .fire(HookEvent::AfterCreate, HookPayload::Create { document: draft.clone() })
            .await?;
        Ok(draft)
    }

    /// Fetch a document regardless of soft-delete state, or fail with `NotFound`
    async fn require(&self, id: &str) -> RepoResult<Snapshot> {
        self.store
            .get(&self.collection, id)
            .await?
            .ok_or_else(|| RepoError::not_found(&self.collection, id))
    }

    /// Fetch many documents concurrently, keeping input order
    pub(crate) async fn fetch_all(&self, ids: &[String]) -> RepoResult<Vec<Option<Snapshot>>> {
        let reads = ids.iter().map(|id| self.store.get(&self.collection, id));
        Ok(try_join_all(reads).await?)
    }

    /// Apply an expanded patch to a stored body and decode the result
    pub(crate) fn merge(&self, snapshot: Snapshot, patch: &ExpandedPatch) -> RepoResult<Merged<T>> {
        merge_snapshot(&self.gate, snapshot, patch)
    }
}

/// A patched document: the stored body to write back, and its decoded form
pub(crate) struct Merged<T> {
    pub(crate) document: Document<T>,
    pub(crate) data: DocumentData,
}

/// Apply `patch` to a stored body, keeping its soft-delete stamp and any
/// fields `T` does not model, and decode the result through `gate`
pub(crate) fn merge_snapshot<T: Entity>(
    gate: &ValidationGate<T>,
    snapshot: Snapshot,
    patch: &ExpandedPatch,
) -> RepoResult<Merged<T>> {
    let Snapshot { id, mut data } = snapshot;
    patch.apply_to(&mut data);
    let deleted_at = match data.get(DELETED_AT_FIELD) {
        Some(Value::String(stamp)) => Some(stamp.clone()),
        _ => None,
    };
    let entity = gate.decode_merged(data.clone())?;
    Ok(Merged {
        document: Document {
            id: Some(id),
            deleted_at,
            data: entity,
        },
        data,
    })
}
