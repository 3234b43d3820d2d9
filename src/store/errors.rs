//! # Store Errors
//!
//! Errors raised by a document store implementation. These never reach
//! repository callers directly; `RepoError::from` translates them once.

use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Native code the store uses for queries it cannot serve without an index
pub const FAILED_PRECONDITION: &str = "FAILED_PRECONDITION";

/// Store-native errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A transaction read was issued after a write was staged on the same handle
    #[error("Reads must be executed before all writes in a transaction")]
    ReadAfterWrite,

    /// A transaction lost an optimistic concurrency check and may be retried
    #[error("Transaction aborted due to contention on {0}")]
    Contention(String),

    /// A field-path update targeted a document that does not exist
    #[error("No document to update: {collection}/{id}")]
    Missing { collection: String, id: String },

    /// The store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Any other error reported by the store, with its native code
    #[error("{code}: {message}")]
    Native { code: String, message: String },
}

impl StoreError {
    /// Create a native error with the given code
    pub fn native(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Native {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Native code used when translating to the repository taxonomy
    pub fn code(&self) -> &str {
        match self {
            StoreError::ReadAfterWrite => "INVALID_ARGUMENT",
            StoreError::Contention(_) => "ABORTED",
            StoreError::Missing { .. } => "NOT_FOUND",
            StoreError::Unavailable(_) => "UNAVAILABLE",
            StoreError::Native { code, .. } => code,
        }
    }

    /// Whether re-running the whole transaction may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Contention(_))
    }
}
