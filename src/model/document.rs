//! Stored entity wrapper
//!
//! Application types stay plain; `Document<T>` carries the two fields the
//! repository owns: the identifier (never persisted in the body) and the
//! `deletedAt` soft-delete stamp (persisted, `null` while active).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{RepoError, RepoResult};
use crate::store::{DocumentData, Snapshot};

/// Identifier field name, reserved in every document
pub const ID_FIELD: &str = "id";

/// Soft-delete stamp field name, reserved in every document
pub const DELETED_AT_FIELD: &str = "deletedAt";

/// Bound for application record types
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Entity for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// An entity together with its identity and soft-delete state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document<T> {
    /// Absent until the store has assigned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// RFC 3339 timestamp; `None` while active
    #[serde(rename = "deletedAt", default)]
    pub deleted_at: Option<String>,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Entity> Document<T> {
    /// Active, unidentified draft
    pub fn draft(data: T) -> Self {
        Self {
            id: None,
            deleted_at: None,
            data,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Identifier, or empty for drafts
    pub fn id_str(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }

    /// Decode a stored snapshot
    pub fn from_snapshot(snapshot: Snapshot) -> RepoResult<Self> {
        let Snapshot { id, data } = snapshot;
        Self::from_data(id, data)
    }

    /// Decode a stored body with its identifier
    pub fn from_data(id: impl Into<String>, mut data: DocumentData) -> RepoResult<Self> {
        let id = id.into();
        let deleted_at = match data.remove(DELETED_AT_FIELD) {
            Some(Value::String(stamp)) => Some(stamp),
            _ => None,
        };
        data.remove(ID_FIELD);

        let value = serde_json::from_value(Value::Object(data)).map_err(|e| RepoError::Store {
            code: "INVALID_DOCUMENT".to_string(),
            message: format!("document {} does not decode: {}", id, e),
        })?;

        Ok(Self {
            id: Some(id),
            deleted_at,
            data: value,
        })
    }

    /// Body to persist: entity fields plus `deletedAt`, without the id
    pub fn to_data(&self) -> RepoResult<DocumentData> {
        let mut data = entity_to_data(&self.data)?;
        data.insert(
            DELETED_AT_FIELD.to_string(),
            self.deleted_at.clone().map(Value::String).unwrap_or(Value::Null),
        );
        Ok(data)
    }
}

/// Serialize an entity into a document body
pub fn entity_to_data<T: Serialize>(entity: &T) -> RepoResult<DocumentData> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(mut data)) => {
            data.remove(ID_FIELD);
            Ok(data)
        }
        Ok(other) => Err(RepoError::Store {
            code: "INVALID_DOCUMENT".to_string(),
            message: format!("entity serialized to {} instead of an object", kind_of(&other)),
        }),
        Err(e) => Err(RepoError::Store {
            code: "INVALID_DOCUMENT".to_string(),
            message: e.to_string(),
        }),
    }
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
