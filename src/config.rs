//! Repository Configuration
//!
//! Limits and conventions shared by every repository bound to a store.

use serde::{Deserialize, Serialize};

use crate::errors::{RepoError, RepoResult, ValidationFailure};

/// Maximum operations the store accepts in one batch commit
pub const DEFAULT_MAX_BATCH_OPERATIONS: usize = 500;

/// Attempts made for a transaction that keeps losing to contention
pub const DEFAULT_TRANSACTION_MAX_ATTEMPTS: usize = 5;

/// Configuration for repositories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Upper bound on operations per batch commit.
    pub max_batch_operations: usize,
    /// Separator for nested field paths in update patches.
    pub path_delimiter: char,
    /// Total attempts for a transaction before contention is reported.
    pub transaction_max_attempts: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            max_batch_operations: DEFAULT_MAX_BATCH_OPERATIONS,
            path_delimiter: '.',
            transaction_max_attempts: DEFAULT_TRANSACTION_MAX_ATTEMPTS,
        }
    }
}

impl RepositoryConfig {
    /// Create config with a custom batch cap.
    pub fn with_max_batch_operations(mut self, max: usize) -> Self {
        self.max_batch_operations = max;
        self
    }

    /// Create config with a custom transaction attempt budget.
    pub fn with_transaction_max_attempts(mut self, attempts: usize) -> Self {
        self.transaction_max_attempts = attempts;
        self
    }

    /// Parse from JSON, filling omitted keys with defaults.
    pub fn from_json(raw: &str) -> RepoResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the repository cannot operate with.
    pub fn validate(&self) -> RepoResult<()> {
        if self.max_batch_operations == 0 {
            return Err(RepoError::Validation(ValidationFailure::single(
                "max_batch_operations",
                "must be at least 1",
            )));
        }
        if self.transaction_max_attempts == 0 {
            return Err(RepoError::Validation(ValidationFailure::single(
                "transaction_max_attempts",
                "must be at least 1",
            )));
        }
        if self.path_delimiter.is_alphanumeric() || self.path_delimiter.is_whitespace() {
            return Err(RepoError::Validation(ValidationFailure::single(
                "path_delimiter",
                "must be a punctuation character",
            )));
        }
        Ok(())
    }
}
