//! Error types for the Custodian.

use custody_core::{CoreError, Identifier, RecordRef, RequestRef};
use custody_perms::PermsError;
use custody_store::StoreError;
use thiserror::Error;

/// Errors that can occur during Custodian operations.
#[derive(Debug, Error)]
pub enum CustodyError {
    /// Data model error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Encryption, key wrapping or request state error.
    #[error("permission error: {0}")]
    Permission(#[from] PermsError),

    /// Caller is not the party allowed to perform the operation.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Request not found.
    #[error("request not found: {0}")]
    RequestNotFound(RequestRef),

    /// Record not found.
    #[error("record not found: {0}")]
    RecordNotFound(RecordRef),

    /// Identifier is not registered.
    #[error("unknown identity: {0}")]
    UnknownIdentity(Identifier),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CustodyError {
    /// Returns true if a wrapped key could not be opened.
    pub fn is_unwrap(&self) -> bool {
        matches!(self, CustodyError::Permission(PermsError::Unwrap(_)))
    }

    /// Returns true if a blob failed authentication or no longer matches
    /// its content identifier.
    pub fn is_integrity(&self) -> bool {
        match self {
            CustodyError::Permission(e) => e.is_integrity(),
            CustodyError::Store(e) => e.is_corrupt(),
            _ => false,
        }
    }
}

/// Result type for Custodian operations.
pub type Result<T> = std::result::Result<T, CustodyError>;
