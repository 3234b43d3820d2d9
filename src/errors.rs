//! # Repository Errors
//!
//! Every public operation either succeeds or fails with exactly one
//! `RepoError`. Store-native errors are translated once, in
//! `From<StoreError>`.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{StoreError, FAILED_PRECONDITION};

/// Result type for repository operations
pub type RepoResult<T> = Result<T, RepoError>;

/// One schema violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Field path (e.g., "address.city", "[2].name")
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Ordered list of schema violations for one input
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationFailure {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    /// Failure with a single issue
    pub fn single(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            issues: vec![ValidationIssue::new(path, message)],
        }
    }

    /// Prefix every issue path with the input's position in a bulk call
    pub fn at_index(self, index: usize) -> Self {
        let issues = self
            .issues
            .into_iter()
            .map(|issue| {
                let path = if issue.path.is_empty() {
                    format!("[{}]", index)
                } else {
                    format!("[{}].{}", index, issue.path)
                };
                ValidationIssue::new(path, issue.message)
            })
            .collect();
        Self { issues }
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.issues.iter().map(|i| i.to_string()).collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Repository errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RepoError {
    #[error("Validation failed: {0}")]
    Validation(ValidationFailure),

    #[error("Document {id} not found in {collection}")]
    NotFound { collection: String, id: String },

    /// Raised by hooks for business-rule violations
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Query requires an index on [{}]: {message}", .fields.join(", "))]
    IndexRequired {
        url: Option<String>,
        fields: Vec<String>,
        message: String,
    },

    #[error("Store error {code}: {message}")]
    Store { code: String, message: String },

    #[error("Transaction ordering violation: {0}")]
    OrderingViolation(String),
}

impl RepoError {
    /// Create a not found error
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an ordering violation error
    pub fn ordering(msg: impl Into<String>) -> Self {
        Self::OrderingViolation(msg.into())
    }

    /// Get error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::IndexRequired { .. } => "INDEX_REQUIRED",
            Self::Store { .. } => "STORE_ERROR",
            Self::OrderingViolation(_) => "ORDERING_VIOLATION",
        }
    }

    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict(_) => 409,
            Self::IndexRequired { .. } => 412,
            Self::Store { code, .. } if code == "UNAVAILABLE" => 503,
            Self::Store { .. } => 500,
            Self::OrderingViolation(_) => 500,
        }
    }
}

impl From<ValidationFailure> for RepoError {
    fn from(failure: ValidationFailure) -> Self {
        Self::Validation(failure)
    }
}

fn index_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"https?://\S+").expect("static regex"))
}

fn index_fields_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[?&]fields=([^&\s]+)").expect("static regex"))
}

impl From<StoreError> for RepoError {
    fn from(e: StoreError) -> Self {
        if let StoreError::Missing { collection, id } = e {
            return Self::NotFound { collection, id };
        }

        let message = match &e {
            StoreError::Native { message, .. } => message.clone(),
            other => other.to_string(),
        };

        if e.code() == FAILED_PRECONDITION && message.to_lowercase().contains("requires an index") {
            let url = index_url_pattern()
                .find(&message)
                .map(|m| m.as_str().to_string());
            let fields = url
                .as_deref()
                .and_then(|u| index_fields_pattern().captures(u))
                .map(|c| c[1].split(',').map(|f| f.to_string()).collect())
                .unwrap_or_default();
            return Self::IndexRequired {
                url,
                fields,
                message,
            };
        }

        Self::Store {
            code: e.code().to_string(),
            message,
        }
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(e: serde_json::Error) -> Self {
        Self::Validation(ValidationFailure::single("", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(RepoError::not_found("users", "u1").status_code(), 404);
        assert_eq!(RepoError::conflict("email taken").status_code(), 409);
        assert_eq!(
            RepoError::Validation(ValidationFailure::single("name", "required")).status_code(),
            400
        );
    }

    #[test]
    fn test_at_index_prefixes_paths() {
        let failure = ValidationFailure::new(vec![
            ValidationIssue::new("name", "required"),
            ValidationIssue::new("", "expected object"),
        ])
        .at_index(3);

        assert_eq!(failure.issues[0].path, "[3].name");
        assert_eq!(failure.issues[1].path, "[3]");
    }

    #[test]
    fn test_index_error_translation() {
        let err: RepoError = StoreError::native(
            FAILED_PRECONDITION,
            "The query requires an index. You can create it here: https://console.test/indexes?collection=orders&fields=status,total",
        )
        .into();

        match err {
            RepoError::IndexRequired { url, fields, .. } => {
                assert_eq!(
                    url.as_deref(),
                    Some("https://console.test/indexes?collection=orders&fields=status,total")
                );
                assert_eq!(fields, vec!["status".to_string(), "total".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_other_store_errors_pass_through() {
        let err: RepoError = StoreError::Unavailable("connection reset".into()).into();
        assert_eq!(err.code(), "STORE_ERROR");
        assert_eq!(err.status_code(), 503);

        let err: RepoError = StoreError::native(FAILED_PRECONDITION, "version mismatch").into();
        assert!(matches!(err, RepoError::Store { .. }));
    }

    #[test]
    fn test_missing_update_target_is_not_found() {
        let err: RepoError = StoreError::Missing {
            collection: "users".into(),
            id: "u9".into(),
        }
        .into();
        assert_eq!(err, RepoError::not_found("users", "u9"));
    }
}
