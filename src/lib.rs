//! aerodoc - Typed repositories over a document store
//!
//! Validated CRUD, lifecycle hooks, soft deletion, capped batch writes and
//! read-before-write transactions for one collection at a time.

pub mod batch;
pub mod config;
pub mod errors;
pub mod hooks;
pub mod model;
pub mod query;
pub mod repository;
pub mod store;
pub mod transaction;
pub mod validation;

pub use config::RepositoryConfig;
pub use errors::{RepoError, RepoResult, ValidationFailure, ValidationIssue};
pub use hooks::{HookEvent, HookPayload};
pub use model::{Document, DocumentUpdate, Patch};
pub use query::{Page, QueryBuilder};
pub use repository::Repository;
pub use store::{DocumentStore, InMemoryStore};
pub use transaction::TransactionContext;
