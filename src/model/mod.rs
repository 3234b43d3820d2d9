//! Entity and update model shared by repositories, hooks and transactions.

mod document;
mod patch;

pub use document::{entity_to_data, Document, Entity, DELETED_AT_FIELD, ID_FIELD};
pub use patch::{DocumentUpdate, ExpandedPatch, Patch};

pub(crate) use document::kind_of;
