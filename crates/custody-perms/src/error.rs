//! Error types for the envelope cipher and permission protocol.

use thiserror::Error;

/// Errors that can occur while sealing, wrapping or opening records.
#[derive(Debug, Error)]
pub enum PermsError {
    /// Input cannot be encoded: oversized plaintext, malformed blob bytes.
    ///
    /// A caller bug; retrying with the same input fails the same way.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A wrapped key could not be opened with the supplied private key.
    ///
    /// Wrong key, a key addressed to another identifier, or corrupt wrapped
    /// bytes. Security relevant and never retried automatically.
    #[error("unwrap error: {0}")]
    Unwrap(String),

    /// Authentication failed on the ciphertext, IV or metadata.
    ///
    /// The blob was altered after encryption. Refetch once; reject if it
    /// repeats.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Core error.
    #[error("core error: {0}")]
    Core(#[from] custody_core::CoreError),
}

impl PermsError {
    /// Returns true if refetching the blob may succeed.
    pub fn is_integrity(&self) -> bool {
        matches!(self, PermsError::Integrity(_))
    }
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
