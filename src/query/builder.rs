//! Fluent query builder
//!
//! Builders are consumed by each refinement and cloned freely; the terminal
//! operations run against the owning repository's store, hooks and batch
//! writer.

use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{RepoError, RepoResult};
use crate::model::{Document, Entity, Patch};
use crate::repository::{active_filter, deleted_filter, Repository};
use crate::store::{Direction, FilterExpr, FilterOperator, OrderSpec, QuerySpec, Snapshot};

/// Which documents a query sees with respect to soft deletion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletedScope {
    /// Only documents without a `deletedAt` stamp
    #[default]
    Active,
    /// Everything
    All,
    /// Only soft-deleted documents
    OnlyDeleted,
}

/// One page of results
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<Document<T>>,
    /// Pass to the next `paginate` call; `None` on the last page
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }
}

/// Query over one repository's collection
pub struct QueryBuilder<T> {
    repo: Repository<T>,
    filters: Vec<FilterExpr>,
    order: Vec<OrderSpec>,
    limit: Option<usize>,
    scope: DeletedScope,
}

impl<T> Clone for QueryBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            filters: self.filters.clone(),
            order: self.order.clone(),
            limit: self.limit,
            scope: self.scope,
        }
    }
}

impl<T: Entity> QueryBuilder<T> {
    pub(crate) fn new(repo: Repository<T>) -> Self {
        Self {
            repo,
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            scope: DeletedScope::Active,
        }
    }

    /// Field equals value
    pub fn where_eq(self, field: impl Into<String>, value: Value) -> Self {
        self.where_field(field, FilterOperator::Eq, value)
    }

    /// Field compared with value
    pub fn where_field(mut self, field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        self.filters.push(FilterExpr::new(field, operator, value));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order.push(OrderSpec {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Include soft-deleted documents
    pub fn include_deleted(mut self) -> Self {
        self.scope = DeletedScope::All;
        self
    }

    /// Restrict to soft-deleted documents
    pub fn only_deleted(mut self) -> Self {
        self.scope = DeletedScope::OnlyDeleted;
        self
    }

    pub fn scope(&self) -> DeletedScope {
        self.scope
    }

    /// The store query this builder runs, soft-delete filter included
    pub fn spec(&self) -> QuerySpec {
        let mut filters = self.filters.clone();
        match self.scope {
            DeletedScope::Active => filters.push(active_filter()),
            DeletedScope::OnlyDeleted => filters.push(deleted_filter()),
            DeletedScope::All => {}
        }
        QuerySpec {
            filters,
            order: self.order.clone(),
            limit: self.limit,
            start_after: None,
        }
    }

    /// Every matching document
    pub async fn get(&self) -> RepoResult<Vec<Document<T>>> {
        let spec = self.spec();
        decode(self.fetch(&spec).await?)
    }

    /// First matching document
    pub async fn get_one(&self) -> RepoResult<Option<Document<T>>> {
        let mut spec = self.spec();
        spec.limit = Some(1);
        Ok(decode(self.fetch(&spec).await?)?.into_iter().next())
    }

    /// Number of matching documents, ignoring `limit`
    pub async fn count(&self) -> RepoResult<usize> {
        let spec = self.spec();
        Ok(self
            .repo
            .store()
            .count(self.repo.collection(), &spec)
            .await?)
    }

    /// One page of at most `page_size` documents, resuming after `cursor`.
    /// `limit` is ignored; the page size governs.
    pub async fn paginate(&self, page_size: usize, cursor: Option<&str>) -> RepoResult<Page<T>> {
        let page_size = page_size.max(1);
        let mut spec = self.spec();
        spec.limit = Some(page_size.saturating_add(1));
        spec.start_after = cursor.map(|c| c.to_string());

        let mut items = decode(self.fetch(&spec).await?)?;
        let next_cursor = if items.len() > page_size {
            items.truncate(page_size);
            items.last().and_then(|doc| doc.id.clone())
        } else {
            None
        };
        Ok(Page { items, next_cursor })
    }

    /// Every matching document, fetched `chunk_size` at a time. A set
    /// `limit` caps the total.
    pub fn stream(&self, chunk_size: usize) -> BoxStream<'static, RepoResult<Document<T>>> {
        let chunk_size = chunk_size.max(1);
        let start = StreamState {
            query: self.clone(),
            cursor: None,
            remaining: self.limit,
            done: false,
        };

        stream::try_unfold(start, move |mut state| async move {
            if state.done || state.remaining == Some(0) {
                return Ok::<_, RepoError>(None);
            }

            let wanted = state
                .remaining
                .map(|left| left.min(chunk_size))
                .unwrap_or(chunk_size);
            let page = state
                .query
                .paginate(wanted, state.cursor.as_deref())
                .await?;

            state.done = page.next_cursor.is_none();
            state.cursor = page.next_cursor;
            if let Some(left) = state.remaining.as_mut() {
                *left -= page.items.len().min(*left);
            }
            Ok(Some((page.items, state)))
        })
        .map_ok(|items| stream::iter(items.into_iter().map(Ok::<_, RepoError>)))
        .try_flatten()
        .boxed()
    }

    /// Apply `patch` to every matching document with bulk update hooks.
    /// Returns the number of documents updated.
    pub async fn update(&self, patch: Patch) -> RepoResult<usize> {
        let matched = self.matched().await?;
        self.repo.update_existing(matched, &patch).await
    }

    /// Permanently delete every matching document with bulk delete hooks
    pub async fn delete(&self) -> RepoResult<usize> {
        let matched = self.matched().await?;
        let ids = matched.iter().map(|s| s.id.clone()).collect();
        self.repo.delete_existing(ids, matched).await
    }

    /// Soft-delete every matching document with bulk soft-delete hooks
    pub async fn soft_delete(&self) -> RepoResult<usize> {
        let matched = self.matched().await?;
        let ids = matched.iter().map(|s| s.id.clone()).collect();
        self.repo.soft_delete_existing(ids, matched).await
    }

    async fn matched(&self) -> RepoResult<Vec<Snapshot>> {
        let spec = self.spec();
        self.fetch(&spec).await
    }

    async fn fetch(&self, spec: &QuerySpec) -> RepoResult<Vec<Snapshot>> {
        Ok(self.repo.store().query(self.repo.collection(), spec).await?)
    }
}

struct StreamState<T> {
    query: QueryBuilder<T>,
    cursor: Option<String>,
    remaining: Option<usize>,
    done: bool,
}

fn decode<T: Entity>(snapshots: Vec<Snapshot>) -> RepoResult<Vec<Document<T>>> {
    snapshots.into_iter().map(Document::from_snapshot).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Order {
        status: String,
        total: i64,
    }

    fn setup() -> (InMemoryStore, Repository<Order>) {
        let store = InMemoryStore::new().with_journal();
        for (id, status, total, deleted) in [
            ("o1", "open", 10, false),
            ("o2", "open", 30, false),
            ("o3", "closed", 20, false),
            ("o4", "open", 40, true),
            ("o5", "open", 50, false),
        ] {
            let stamp = if deleted { json!("2024-01-01T00:00:00.000Z") } else { Value::Null };
            store.insert("orders", id, json!({"status": status, "total": total, "deletedAt": stamp}));
        }
        let repo = Repository::new(Arc::new(store.clone()), "orders");
        (store, repo)
    }

    fn ids(docs: &[Document<Order>]) -> Vec<&str> {
        docs.iter().map(|d| d.id_str()).collect()
    }

    #[tokio::test]
    async fn test_soft_deleted_hidden_by_default() {
        let (_store, repo) = setup();

        let open = repo.query().where_eq("status", json!("open")).get().await.unwrap();
        assert_eq!(ids(&open), vec!["o1", "o2", "o5"]);

        let all = repo.query().include_deleted().count().await.unwrap();
        assert_eq!(all, 5);

        let deleted = repo.query().only_deleted().get().await.unwrap();
        assert_eq!(ids(&deleted), vec!["o4"]);
    }

    #[tokio::test]
    async fn test_order_and_limit() {
        let (_store, repo) = setup();

        let top = repo
            .query()
            .order_by("total", Direction::Desc)
            .limit(2)
            .get()
            .await
            .unwrap();
        assert_eq!(ids(&top), vec!["o5", "o2"]);

        let cheap = repo
            .query()
            .where_field("total", FilterOperator::Lt, json!(25))
            .order_by("total", Direction::Asc)
            .get_one()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cheap.id_str(), "o1");
    }

    #[tokio::test]
    async fn test_paginate_walks_every_page() {
        let (_store, repo) = setup();
        let query = repo.query().order_by("total", Direction::Asc);

        let first = query.paginate(2, None).await.unwrap();
        assert_eq!(ids(&first.items), vec!["o1", "o3"]);
        assert!(first.has_more());

        let second = query.paginate(2, first.next_cursor.as_deref()).await.unwrap();
        assert_eq!(ids(&second.items), vec!["o2", "o5"]);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_paginate_with_unbounded_page_size() {
        let (_store, repo) = setup();

        let page = repo.query().paginate(usize::MAX, None).await.unwrap();

        assert_eq!(page.items.len(), 4);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_stream_yields_everything_in_chunks() {
        let (_store, repo) = setup();

        let streamed: Vec<Document<Order>> = repo
            .query()
            .include_deleted()
            .stream(2)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(ids(&streamed), vec!["o1", "o2", "o3", "o4", "o5"]);

        let capped: Vec<Document<Order>> = repo
            .query()
            .limit(3)
            .stream(2)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(ids(&capped), vec!["o1", "o2", "o3"]);
    }

    #[tokio::test]
    async fn test_query_scoped_writes() {
        let (store, repo) = setup();

        let updated = repo
            .query()
            .where_eq("status", json!("open"))
            .update(Patch::new().set("status", json!("held")))
            .await
            .unwrap();
        assert_eq!(updated, 3);
        assert_eq!(store.document("orders", "o4").unwrap()["status"], "open");

        let soft = repo
            .query()
            .where_eq("status", json!("held"))
            .soft_delete()
            .await
            .unwrap();
        assert_eq!(soft, 3);

        let purged = repo.query().only_deleted().delete().await.unwrap();
        assert_eq!(purged, 4);
        assert_eq!(store.len("orders"), 1);

        let none = repo.query().where_eq("status", json!("missing")).delete().await.unwrap();
        assert_eq!(none, 0);
    }

    #[tokio::test]
    async fn test_missing_index_is_translated() {
        let store = InMemoryStore::new().with_journal().with_index_enforcement("https://console.test/indexes");
        let repo: Repository<Order> = Repository::new(Arc::new(store), "orders");

        let err = repo
            .query()
            .where_eq("status", json!("open"))
            .order_by("total", Direction::Desc)
            .get()
            .await
            .unwrap_err();

        match err {
            RepoError::IndexRequired { url, fields, .. } => {
                assert!(url.unwrap().starts_with("https://console.test/indexes"));
                assert!(fields.contains(&"status".to_string()));
                assert!(fields.contains(&"total".to_string()));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
