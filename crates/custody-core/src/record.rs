//! Record metadata and wrapped keys.
//!
//! A record is what the record index stores for one upload: who owns it,
//! what kind of data it is, where the ciphertext lives and the content key
//! sealed to one reader. Records are immutable; a data update is a new
//! upload and therefore a new record.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::canonical::canonical_record_bytes;
use crate::crypto::ContentHash;
use crate::error::{CoreError, Result};
use crate::types::{ContentId, Identifier, RecordRef};

/// Domain separation context for record references.
pub const RECORD_CONTEXT: &str = "custody 2024 record ref v1";

/// Maximum length of a data type label, in bytes.
pub const MAX_DATA_TYPE_LEN: usize = 128;

/// A content key sealed to one recipient.
///
/// `wrapped_bytes` is opaque here; `custody-perms` produces and opens it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    /// Identifier of the only identity able to unwrap.
    pub recipient: Identifier,

    /// The sealed key.
    #[serde(with = "crate::codec::base64_serde")]
    pub wrapped_bytes: Vec<u8>,
}

impl WrappedKey {
    pub fn new(recipient: Identifier, wrapped_bytes: Vec<u8>) -> Self {
        Self {
            recipient,
            wrapped_bytes,
        }
    }
}

impl fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedKey")
            .field("recipient", &self.recipient)
            .field("len", &self.wrapped_bytes.len())
            .finish()
    }
}

/// Metadata published to the record index for one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// The data owner.
    pub owner: Identifier,

    /// Category label, e.g. `lab` or `imaging`.
    pub data_type: String,

    /// Where the encrypted blob lives.
    pub content_id: ContentId,

    /// The content key, sealed to one reader.
    pub wrapped_key: WrappedKey,
}

impl RecordMetadata {
    /// Build record metadata, validating the data type label.
    pub fn new(
        owner: Identifier,
        data_type: impl Into<String>,
        content_id: ContentId,
        wrapped_key: WrappedKey,
    ) -> Result<Self> {
        let data_type = data_type.into();
        if data_type.trim().is_empty() {
            return Err(CoreError::InvalidRecord("data type is empty".into()));
        }
        if data_type.len() > MAX_DATA_TYPE_LEN {
            return Err(CoreError::InvalidRecord(format!(
                "data type exceeds {} bytes",
                MAX_DATA_TYPE_LEN
            )));
        }
        if content_id.as_str().is_empty() {
            return Err(CoreError::InvalidRecord("content id is empty".into()));
        }
        Ok(Self {
            owner,
            data_type,
            content_id,
            wrapped_key,
        })
    }

    /// Compute the content-addressed reference of this record.
    ///
    /// Identical metadata always yields the identical reference, which is
    /// what makes publishing idempotent.
    pub fn record_ref(&self) -> RecordRef {
        ContentHash::derive(RECORD_CONTEXT, &canonical_record_bytes(self)).into()
    }

    /// Returns true if the wrapped key is addressed to `reader`.
    pub fn is_readable_by(&self, reader: &Identifier) -> bool {
        self.wrapped_key.recipient == *reader
    }

    /// Metadata for the same content, sealed to another reader.
    pub fn for_reader(&self, wrapped_key: WrappedKey) -> Self {
        Self {
            owner: self.owner,
            data_type: self.data_type.clone(),
            content_id: self.content_id.clone(),
            wrapped_key,
        }
    }
}
