//! Collaborator interfaces.
//!
//! The core treats content storage, the record index, the identity registry,
//! the permission ledger and the notification log as external services.
//! These traits are the narrow surface it uses; [`MemoryStore`] and
//! [`SqliteStore`] implement all of them so the core can run end to end.
//!
//! [`MemoryStore`]: crate::MemoryStore
//! [`SqliteStore`]: crate::SqliteStore

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use custody_core::{ContentId, Identifier, Identity, RecordMetadata, RecordRef, RequestRef, WrappedKey};
use custody_perms::{PermissionRequest, Transition};

use crate::error::Result;

/// Result of publishing a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Record was inserted.
    Inserted,
    /// Identical record already exists (idempotent - not an error).
    AlreadyExists,
}

/// A message in an identity's inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Identifier,
    pub message: String,
    /// When the notification was written (Unix ms).
    pub created_at: i64,
}

/// Content-addressed blob storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store bytes and return their content identifier.
    ///
    /// Idempotent: the same bytes always yield the same identifier.
    async fn put(&self, bytes: Bytes) -> Result<ContentId>;

    /// Fetch bytes by content identifier.
    ///
    /// Fails with `NotFound` if the content is absent.
    async fn get(&self, id: &ContentId) -> Result<Bytes>;
}

/// Owner-keyed index of published records.
#[async_trait]
pub trait RecordIndex: Send + Sync {
    /// Publish record metadata.
    ///
    /// Returns the record's content-derived reference. Publishing identical
    /// metadata again returns the same reference and `AlreadyExists`.
    async fn publish(&self, record: &RecordMetadata) -> Result<(RecordRef, InsertResult)>;

    /// All records owned by `owner`, in publish order.
    async fn list_records(&self, owner: &Identifier) -> Result<Vec<RecordMetadata>>;

    /// Get a record by reference.
    async fn get_record(&self, record_ref: &RecordRef) -> Result<Option<RecordMetadata>>;

    /// All records whose wrapped key is addressed to `reader`, in publish order.
    async fn list_readable(&self, reader: &Identifier) -> Result<Vec<RecordMetadata>>;
}

/// Read-only lookup of registered identities.
#[async_trait]
pub trait IdentityRegistry: Send + Sync {
    /// Resolve an identifier to its identity.
    async fn resolve(&self, identifier: &Identifier) -> Result<Option<Identity>>;
}

/// Durable log of permission requests and their decisions.
///
/// Transitions are compare-and-set: only a `Requested` request moves, and a
/// terminal request is returned as `Transition::Unchanged`.
#[async_trait]
pub trait PermissionLedger: Send + Sync {
    /// File a request, or return the one already open for the same
    /// requester, granter and record (`AlreadyExists`).
    async fn request(
        &self,
        requester: &Identifier,
        granter: &Identifier,
        record_ref: &RecordRef,
    ) -> Result<(PermissionRequest, InsertResult)>;

    /// Approve an open request, storing the key wrapped for the requester.
    ///
    /// Fails with `NotFound` for an unknown reference.
    async fn approve(&self, request_ref: &RequestRef, granted_key: &WrappedKey)
        -> Result<Transition>;

    /// Deny an open request.
    ///
    /// Fails with `NotFound` for an unknown reference.
    async fn deny(&self, request_ref: &RequestRef) -> Result<Transition>;

    /// Current state of a request.
    async fn status(&self, request_ref: &RequestRef) -> Result<Option<PermissionRequest>>;

    /// Open requests addressed to `granter`, oldest first.
    async fn pending_for(&self, granter: &Identifier) -> Result<Vec<PermissionRequest>>;
}

/// Per-identity inbox.
#[async_trait]
pub trait NotificationLog: Send + Sync {
    /// Append a message to `recipient`'s inbox.
    async fn notify(&self, recipient: &Identifier, message: &str) -> Result<()>;

    /// All messages for `recipient`, oldest first.
    async fn notifications(&self, recipient: &Identifier) -> Result<Vec<Notification>>;
}

/// A backend that provides every collaborator.
pub trait Backend:
    ContentStore + RecordIndex + IdentityRegistry + PermissionLedger + NotificationLog
{
}

impl<T> Backend for T where
    T: ContentStore + RecordIndex + IdentityRegistry + PermissionLedger + NotificationLog
{
}

/// Content identifier used by the reference backends: hex BLAKE3 of the bytes.
pub fn blake3_content_id(bytes: &[u8]) -> ContentId {
    ContentId::new(custody_core::ContentHash::hash(bytes).to_hex())
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_content_id_is_lowercase_hex_digest(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
            let id = blake3_content_id(&bytes);
            prop_assert_eq!(id.as_str().len(), 64);
            prop_assert!(id.as_str().bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
            prop_assert_eq!(id, blake3_content_id(&bytes));
        }

        #[test]
        fn test_content_id_separates_inputs(
            a in prop::collection::vec(any::<u8>(), 0..64),
            b in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(blake3_content_id(&a), blake3_content_id(&b));
        }
    }

    #[test]
    fn test_now_millis_is_unix_millis() {
        let before = now_millis();
        assert!(before > 1_600_000_000_000);
        assert!(now_millis() >= before);
    }
}
