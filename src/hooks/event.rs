//! # Hook Events

use serde::{Deserialize, Serialize};

use crate::model::{Document, DocumentUpdate, Patch};

/// Lifecycle points at which hooks fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookEvent {
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
    BeforeSoftDelete,
    AfterSoftDelete,
    BeforeRestore,
    AfterRestore,
    BeforeBulkCreate,
    AfterBulkCreate,
    BeforeBulkUpdate,
    AfterBulkUpdate,
    BeforeBulkDelete,
    AfterBulkDelete,
    BeforeBulkSoftDelete,
    AfterBulkSoftDelete,
    BeforeBulkRestore,
    AfterBulkRestore,
}

impl HookEvent {
    /// Every event, before/after pairs adjacent
    pub const ALL: [HookEvent; 20] = [
        HookEvent::BeforeCreate,
        HookEvent::AfterCreate,
        HookEvent::BeforeUpdate,
        HookEvent::AfterUpdate,
        HookEvent::BeforeDelete,
        HookEvent::AfterDelete,
        HookEvent::BeforeSoftDelete,
        HookEvent::AfterSoftDelete,
        HookEvent::BeforeRestore,
        HookEvent::AfterRestore,
        HookEvent::BeforeBulkCreate,
        HookEvent::AfterBulkCreate,
        HookEvent::BeforeBulkUpdate,
        HookEvent::AfterBulkUpdate,
        HookEvent::BeforeBulkDelete,
        HookEvent::AfterBulkDelete,
        HookEvent::BeforeBulkSoftDelete,
        HookEvent::AfterBulkSoftDelete,
        HookEvent::BeforeBulkRestore,
        HookEvent::AfterBulkRestore,
    ];

    /// Get event name for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::BeforeCreate => "beforeCreate",
            HookEvent::AfterCreate => "afterCreate",
            HookEvent::BeforeUpdate => "beforeUpdate",
            HookEvent::AfterUpdate => "afterUpdate",
            HookEvent::BeforeDelete => "beforeDelete",
            HookEvent::AfterDelete => "afterDelete",
            HookEvent::BeforeSoftDelete => "beforeSoftDelete",
            HookEvent::AfterSoftDelete => "afterSoftDelete",
            HookEvent::BeforeRestore => "beforeRestore",
            HookEvent::AfterRestore => "afterRestore",
            HookEvent::BeforeBulkCreate => "beforeBulkCreate",
            HookEvent::AfterBulkCreate => "afterBulkCreate",
            HookEvent::BeforeBulkUpdate => "beforeBulkUpdate",
            HookEvent::AfterBulkUpdate => "afterBulkUpdate",
            HookEvent::BeforeBulkDelete => "beforeBulkDelete",
            HookEvent::AfterBulkDelete => "afterBulkDelete",
            HookEvent::BeforeBulkSoftDelete => "beforeBulkSoftDelete",
            HookEvent::AfterBulkSoftDelete => "afterBulkSoftDelete",
            HookEvent::BeforeBulkRestore => "beforeBulkRestore",
            HookEvent::AfterBulkRestore => "afterBulkRestore",
        }
    }

    pub fn is_before(&self) -> bool {
        self.as_str().starts_with("before")
    }

    pub fn is_bulk(&self) -> bool {
        self.as_str().contains("Bulk")
    }
}

/// Data handed to hooks. Each event has exactly one payload variant.
#[derive(Debug, Clone, PartialEq)]
pub enum HookPayload<T> {
    /// Before: stamped draft without id. After: persisted document.
    Create { document: Document<T> },
    /// The caller's patch, plus the merged document when it is known.
    /// Transactional updates only know it if the document was read first.
    Update {
        id: String,
        patch: Patch,
        document: Option<Document<T>>,
    },
    /// Pre-deletion snapshot
    Delete { id: String, snapshot: Document<T> },
    SoftDelete { id: String, deleted_at: String },
    Restore { id: String },
    /// Prepared documents, identifiers already assigned
    BulkCreate { documents: Vec<Document<T>> },
    /// The update list exactly as the caller passed it
    BulkUpdate { updates: Vec<DocumentUpdate> },
    /// Requested ids and snapshots of the ones that existed
    BulkDelete {
        ids: Vec<String>,
        snapshots: Vec<Document<T>>,
    },
    BulkSoftDelete {
        ids: Vec<String>,
        deleted_at: String,
        snapshots: Vec<Document<T>>,
    },
    BulkRestore { ids: Vec<String> },
}

impl<T> HookPayload<T> {
    /// Whether this payload shape belongs to `event`
    pub fn fits(&self, event: HookEvent) -> bool {
        use HookEvent::*;
        matches!(
            (self, event),
            (HookPayload::Create { .. }, BeforeCreate | AfterCreate)
                | (HookPayload::Update { .. }, BeforeUpdate | AfterUpdate)
                | (HookPayload::Delete { .. }, BeforeDelete | AfterDelete)
                | (HookPayload::SoftDelete { .. }, BeforeSoftDelete | AfterSoftDelete)
                | (HookPayload::Restore { .. }, BeforeRestore | AfterRestore)
                | (HookPayload::BulkCreate { .. }, BeforeBulkCreate | AfterBulkCreate)
                | (HookPayload::BulkUpdate { .. }, BeforeBulkUpdate | AfterBulkUpdate)
                | (HookPayload::BulkDelete { .. }, BeforeBulkDelete | AfterBulkDelete)
                | (
                    HookPayload::BulkSoftDelete { .. },
                    BeforeBulkSoftDelete | AfterBulkSoftDelete
                )
                | (HookPayload::BulkRestore { .. }, BeforeBulkRestore | AfterBulkRestore)
        )
    }
}
