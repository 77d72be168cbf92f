//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Content, record, identity or request not found.
    ///
    /// For content this may be transient (not yet propagated); readers
    /// retry it with backoff.
    #[error("not found: {0}")]
    NotFound(String),

    /// Stored bytes no longer match their content identifier.
    #[error("corrupt content: {0}")]
    Corrupt(String),

    /// Invalid data in storage or a rejected write.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A lock was poisoned or a blocking task failed.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns true for [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Returns true for [`StoreError::Corrupt`].
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StoreError::Corrupt(_))
    }
}

impl From<custody_core::CoreError> for StoreError {
    fn from(e: custody_core::CoreError) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<custody_perms::PermsError> for StoreError {
    fn from(e: custody_perms::PermsError) -> Self {
        StoreError::InvalidData(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
