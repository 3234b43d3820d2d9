//! Query layer
//!
//! `QueryBuilder` composes filters, ordering and limits over one collection,
//! hiding soft-deleted documents unless asked, and offers bulk writes scoped
//! to whatever the query matches.

mod builder;

pub use builder::{DeletedScope, Page, QueryBuilder};
