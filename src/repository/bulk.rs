//! Bulk operations
//!
//! Everything here goes through the `BatchWriter`, so arbitrarily large
//! inputs are split into capped commits. Validation and existence checks
//! complete for the whole input before the first commit.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::batch::WriteAction;
use crate::errors::{RepoError, RepoResult, ValidationFailure};
use crate::hooks::{HookEvent, HookPayload};
use crate::model::{Document, DocumentUpdate, Entity, Patch};
use crate::store::{QuerySpec, Snapshot};

use super::{deleted_filter, deletion_stamp, stamp_data, Merged, Repository};

impl<T: Entity> Repository<T> {
    /// Validate every input, then insert them all with pre-assigned ids.
    ///
    /// # Errors
    ///
    /// `Validation` listing the issues of every rejected item, paths prefixed
    /// with the item's position (`[3].name`). Nothing is written.
    pub async fn bulk_create<D: Serialize>(&self, inputs: &[D]) -> RepoResult<Vec<Document<T>>> {
        let mut issues = Vec::new();
        let mut entities = Vec::with_capacity(inputs.len());

        for (index, input) in inputs.iter().enumerate() {
            let checked = serde_json::to_value(input)
                .map_err(|e| ValidationFailure::single("", e.to_string()))
                .and_then(|value| self.gate().for_create(&value));
            match checked {
                Ok(entity) => entities.push(entity),
                Err(failure) => issues.extend(failure.at_index(index).issues),
            }
        }
        if !issues.is_empty() {
            return Err(RepoError::Validation(ValidationFailure::new(issues)));
        }
        if entities.is_empty() {
            return Ok(Vec::new());
        }

        let documents: Vec<Document<T>> = entities
            .into_iter()
            .map(|entity| Document::draft(entity).with_id(self.store().generate_id()))
            .collect();

        self.hooks()
            .fire(
                HookEvent::BeforeBulkCreate,
                HookPayload::BulkCreate {
                    documents: documents.clone(),
                },
            )
            .await?;

        let actions = documents
            .iter()
            .map(|doc| Ok(WriteAction::set(self.collection(), doc.id_str(), doc.to_data()?)))
            .collect::<RepoResult<Vec<_>>>()?;
        let report = self.batch_writer().commit(actions).await?;
        debug!(
            collection = self.collection(),
            documents = documents.len(),
            commits = report.commits,
            "bulk create committed"
        );

        self.hooks()
            .fire(
                HookEvent::AfterBulkCreate,
                HookPayload::BulkCreate {
                    documents: documents.clone(),
                },
            )
            .await?;
        Ok(documents)
    }

    /// Apply a patch to each listed document. Repeated ids are applied in
    /// order, each patch on top of the previous one; the returned list has
    /// one document per update.
    ///
    /// # Errors
    ///
    /// `NotFound` for the first missing id, before anything is validated or
    /// written; `Validation` with index-prefixed issues.
    pub async fn bulk_update(&self, updates: Vec<DocumentUpdate>) -> RepoResult<Vec<Document<T>>> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }

        let ids = distinct(updates.iter().map(|u| u.id.as_str()));
        let snapshots = self.fetch_all(&ids).await?;

        let mut current = HashMap::with_capacity(ids.len());
        for (id, snapshot) in ids.iter().zip(snapshots) {
            match snapshot {
                Some(snapshot) => current.insert(id.clone(), snapshot),
                None => return Err(RepoError::not_found(self.collection(), id.as_str())),
            };
        }

        let delimiter = self.config().path_delimiter;
        let mut issues = Vec::new();
        let mut merged = Vec::with_capacity(updates.len());
        for (index, update) in updates.iter().enumerate() {
            let expanded = match update
                .patch
                .expand(delimiter)
                .and_then(|expanded| self.gate().for_update(&expanded))
            {
                Ok(expanded) => expanded,
                Err(failure) => {
                    issues.extend(failure.at_index(index).issues);
                    continue;
                }
            };
            let Some(base) = current.get(&update.id) else { continue };
            match self.merge(base.clone(), &expanded) {
                Ok(Merged { document, data }) => {
                    current.insert(update.id.clone(), Snapshot::new(update.id.as_str(), data));
                    merged.push(document);
                }
                Err(RepoError::Validation(failure)) => issues.extend(failure.at_index(index).issues),
                Err(other) => return Err(other),
            }
        }
        if !issues.is_empty() {
            return Err(RepoError::Validation(ValidationFailure::new(issues)));
        }

        let payload = HookPayload::BulkUpdate { updates };
        self.hooks()
            .fire(HookEvent::BeforeBulkUpdate, payload.clone())
            .await?;

        let actions: Vec<WriteAction> = ids
            .iter()
            .filter_map(|id| current.remove(id))
            .map(|s| WriteAction::merge(self.collection(), s.id.as_str(), s.data))
            .collect();
        let documents = actions.len();
        self.batch_writer().commit(actions).await?;
        debug!(collection = self.collection(), documents, "bulk update committed");

        self.hooks().fire(HookEvent::AfterBulkUpdate, payload).await?;
        Ok(merged)
    }

    /// Permanently delete the listed documents. Missing ids are skipped.
    ///
    /// Returns the number of documents removed.
    pub async fn bulk_delete(&self, ids: &[String]) -> RepoResult<usize> {
        let existing = self.existing(ids).await?;
        self.delete_existing(ids.to_vec(), existing).await
    }

    /// Soft-delete the listed documents with one shared stamp. Missing ids are
    /// skipped.
    pub async fn bulk_soft_delete(&self, ids: &[String]) -> RepoResult<usize> {
        let existing = self.existing(ids).await?;
        self.soft_delete_existing(ids.to_vec(), existing).await
    }

    /// Clear the stamp on every soft-deleted document in the collection
    pub async fn restore_all(&self) -> RepoResult<usize> {
        let deleted = self.deleted_snapshots().await?;
        if deleted.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = deleted.into_iter().map(|s| s.id).collect();
        let payload = HookPayload::BulkRestore { ids: ids.clone() };
        self.hooks()
            .fire(HookEvent::BeforeBulkRestore, payload.clone())
            .await?;

        let actions = ids
            .iter()
            .map(|id| WriteAction::merge(self.collection(), id.as_str(), stamp_data(None)))
            .collect();
        self.batch_writer().commit(actions).await?;
        debug!(collection = self.collection(), documents = ids.len(), "bulk restore committed");

        self.hooks().fire(HookEvent::AfterBulkRestore, payload).await?;
        Ok(ids.len())
    }

    /// Permanently remove every soft-deleted document. No hooks fire.
    pub async fn purge_deleted(&self) -> RepoResult<usize> {
        let deleted = self.deleted_snapshots().await?;
        let purged = deleted.len();
        if purged == 0 {
            return Ok(0);
        }

        let actions = deleted
            .iter()
            .map(|s| WriteAction::delete(self.collection(), s.id.as_str()))
            .collect();
        self.batch_writer().commit(actions).await?;

        info!(collection = self.collection(), purged, "purged soft-deleted documents");
        Ok(purged)
    }

    /// Delete already-fetched documents with bulk hooks. `ids` is the
    /// requested list handed to hooks; `existing` is what will be removed.
    pub(crate) async fn delete_existing(&self, ids: Vec<String>, existing: Vec<Snapshot>) -> RepoResult<usize> {
        if existing.is_empty() {
            return Ok(0);
        }

        let actions: Vec<WriteAction> = existing
            .iter()
            .map(|s| WriteAction::delete(self.collection(), s.id.as_str()))
            .collect();
        let count = actions.len();

        let payload = HookPayload::BulkDelete {
            ids,
            snapshots: decode_all(existing)?,
        };
        self.hooks()
            .fire(HookEvent::BeforeBulkDelete, payload.clone())
            .await?;

        self.batch_writer().commit(actions).await?;
        debug!(collection = self.collection(), documents = count, "bulk delete committed");

        self.hooks().fire(HookEvent::AfterBulkDelete, payload).await?;
        Ok(count)
    }

    /// Stamp already-fetched documents as deleted, with bulk hooks
    pub(crate) async fn soft_delete_existing(&self, ids: Vec<String>, existing: Vec<Snapshot>) -> RepoResult<usize> {
        if existing.is_empty() {
            return Ok(0);
        }

        let stamp = deletion_stamp();
        let snapshots = decode_all(existing)?;
        let actions: Vec<WriteAction> = snapshots
            .iter()
            .map(|doc| WriteAction::merge(self.collection(), doc.id_str(), stamp_data(Some(&stamp))))
            .collect();
        let count = actions.len();

        let payload = HookPayload::BulkSoftDelete {
            ids,
            deleted_at: stamp,
            snapshots,
        };
        self.hooks()
            .fire(HookEvent::BeforeBulkSoftDelete, payload.clone())
            .await?;

        self.batch_writer().commit(actions).await?;
        debug!(collection = self.collection(), documents = count, "bulk soft delete committed");

        self.hooks()
            .fire(HookEvent::AfterBulkSoftDelete, payload)
            .await?;
        Ok(count)
    }

    /// Apply one patch to already-fetched documents, with bulk update hooks
    pub(crate) async fn update_existing(&self, existing: Vec<Snapshot>, patch: &Patch) -> RepoResult<usize> {
        if existing.is_empty() {
            return Ok(0);
        }

        let expanded = self.gate().for_update(&patch.expand(self.config().path_delimiter)?)?;

        let mut merged = Vec::with_capacity(existing.len());
        for snapshot in existing {
            merged.push(self.merge(snapshot, &expanded)?);
        }

        let updates: Vec<DocumentUpdate> = merged
            .iter()
            .map(|m| DocumentUpdate::new(m.document.id_str(), patch.clone()))
            .collect();
        let payload = HookPayload::BulkUpdate { updates };
        self.hooks()
            .fire(HookEvent::BeforeBulkUpdate, payload.clone())
            .await?;

        let actions: Vec<WriteAction> = merged
            .into_iter()
            .map(|m| WriteAction::merge(self.collection(), m.document.id_str(), m.data))
            .collect();
        let count = actions.len();
        self.batch_writer().commit(actions).await?;

        self.hooks().fire(HookEvent::AfterBulkUpdate, payload).await?;
        Ok(count)
    }

    /// Snapshots of the listed documents that exist, each id fetched once
    async fn existing(&self, ids: &[String]) -> RepoResult<Vec<Snapshot>> {
        let ids = distinct(ids.iter().map(String::as_str));
        Ok(self.fetch_all(&ids).await?.into_iter().flatten().collect())
    }

    async fn deleted_snapshots(&self) -> RepoResult<Vec<Snapshot>> {
        let spec = QuerySpec {
            filters: vec![deleted_filter()],
            ..QuerySpec::default()
        };
        Ok(self.store().query(self.collection(), &spec).await?)
    }
}

/// Ids in first-seen order, without repeats
fn distinct<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(*id)).map(str::to_string).collect()
}

fn decode_all<T: Entity>(snapshots: Vec<Snapshot>) -> RepoResult<Vec<Document<T>>> {
    snapshots.into_iter().map(Document::from_snapshot).collect()
}
