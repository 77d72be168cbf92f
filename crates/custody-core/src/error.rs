//! Error types for Custody Core.

use thiserror::Error;

/// Core errors: malformed identifiers, keys and record metadata.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("identifier mismatch: expected {expected}, derived {derived}")]
    IdentifierMismatch { expected: String, derived: String },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
