//! In-memory implementation of the collaborator traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;

use custody_core::{ContentId, Identifier, Identity, RecordMetadata, RecordRef, RequestRef, WrappedKey};
use custody_perms::{derive_request_ref, PermissionRequest, Transition};

use crate::error::{Result, StoreError};
use crate::traits::{
    blake3_content_id, now_millis, ContentStore, IdentityRegistry, InsertResult, Notification,
    NotificationLog, PermissionLedger, RecordIndex,
};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Blobs indexed by content identifier.
    blobs: HashMap<ContentId, Bytes>,

    /// Records indexed by reference.
    records: HashMap<RecordRef, RecordMetadata>,

    /// Record references in publish order.
    record_order: Vec<RecordRef>,

    /// Registered identities.
    identities: HashMap<Identifier, Identity>,

    /// Permission requests indexed by reference.
    requests: HashMap<RequestRef, PermissionRequest>,

    /// Request references in filing order.
    request_order: Vec<RequestRef>,

    /// Inboxes.
    notifications: HashMap<Identifier, Vec<Notification>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Register an identity. Re-registering the same identity is a no-op.
    pub fn register(&self, identity: Identity) -> Result<InsertResult> {
        let mut inner = self.write()?;
        if inner.identities.contains_key(&identity.identifier()) {
            return Ok(InsertResult::AlreadyExists);
        }
        inner.identities.insert(identity.identifier(), identity);
        Ok(InsertResult::Inserted)
    }

    /// Number of stored blobs.
    pub fn blob_count(&self) -> Result<usize> {
        Ok(self.read()?.blobs.len())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn put(&self, bytes: Bytes) -> Result<ContentId> {
        let id = blake3_content_id(&bytes);
        self.write()?.blobs.entry(id.clone()).or_insert(bytes);
        Ok(id)
    }

    async fn get(&self, id: &ContentId) -> Result<Bytes> {
        let bytes = self
            .read()?
            .blobs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("content {}", id)))?;

        if blake3_content_id(&bytes) != *id {
            return Err(StoreError::Corrupt(format!("content {}", id)));
        }
        Ok(bytes)
    }
}

#[async_trait]
impl RecordIndex for MemoryStore {
    async fn publish(&self, record: &RecordMetadata) -> Result<(RecordRef, InsertResult)> {
        let record_ref = record.record_ref();
        let mut inner = self.write()?;

        if inner.records.contains_key(&record_ref) {
            return Ok((record_ref, InsertResult::AlreadyExists));
        }

        inner.records.insert(record_ref, record.clone());
        inner.record_order.push(record_ref);
        Ok((record_ref, InsertResult::Inserted))
    }

    async fn list_records(&self, owner: &Identifier) -> Result<Vec<RecordMetadata>> {
        let inner = self.read()?;
        Ok(inner
            .record_order
            .iter()
            .filter_map(|r| inner.records.get(r))
            .filter(|m| m.owner == *owner)
            .cloned()
            .collect())
    }

    async fn get_record(&self, record_ref: &RecordRef) -> Result<Option<RecordMetadata>> {
        Ok(self.read()?.records.get(record_ref).cloned())
    }

    async fn list_readable(&self, reader: &Identifier) -> Result<Vec<RecordMetadata>> {
        let inner = self.read()?;
        Ok(inner
            .record_order
            .iter()
            .filter_map(|r| inner.records.get(r))
            .filter(|m| m.is_readable_by(reader))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IdentityRegistry for MemoryStore {
    async fn resolve(&self, identifier: &Identifier) -> Result<Option<Identity>> {
        Ok(self.read()?.identities.get(identifier).cloned())
    }
}

#[async_trait]
impl PermissionLedger for MemoryStore {
    async fn request(
        &self,
        requester: &Identifier,
        granter: &Identifier,
        record_ref: &RecordRef,
    ) -> Result<(PermissionRequest, InsertResult)> {
        let mut inner = self.write()?;

        let mut seq = 0u64;
        for existing in inner.request_order.iter().filter_map(|r| inner.requests.get(r)) {
            if existing.requester == *requester
                && existing.granter == *granter
                && existing.record_ref == *record_ref
            {
                if existing.is_open() {
                    return Ok((existing.clone(), InsertResult::AlreadyExists));
                }
                seq += 1;
            }
        }

        let request_ref = derive_request_ref(requester, granter, record_ref, seq);
        let request =
            PermissionRequest::new(request_ref, *requester, *granter, *record_ref, now_millis());

        inner.requests.insert(request_ref, request.clone());
        inner.request_order.push(request_ref);
        Ok((request, InsertResult::Inserted))
    }

    async fn approve(
        &self,
        request_ref: &RequestRef,
        granted_key: &WrappedKey,
    ) -> Result<Transition> {
        let mut inner = self.write()?;
        let request = inner
            .requests
            .get_mut(request_ref)
            .ok_or_else(|| StoreError::NotFound(format!("request {}", request_ref)))?;

        if request.approve(granted_key.clone())? {
            Ok(Transition::Applied(request.clone()))
        } else {
            Ok(Transition::Unchanged(request.clone()))
        }
    }

    async fn deny(&self, request_ref: &RequestRef) -> Result<Transition> {
        let mut inner = self.write()?;
        let request = inner
            .requests
            .get_mut(request_ref)
            .ok_or_else(|| StoreError::NotFound(format!("request {}", request_ref)))?;

        if request.deny() {
            Ok(Transition::Applied(request.clone()))
        } else {
            Ok(Transition::Unchanged(request.clone()))
        }
    }

    async fn status(&self, request_ref: &RequestRef) -> Result<Option<PermissionRequest>> {
        Ok(self.read()?.requests.get(request_ref).cloned())
    }

    async fn pending_for(&self, granter: &Identifier) -> Result<Vec<PermissionRequest>> {
        let inner = self.read()?;
        Ok(inner
            .request_order
            .iter()
            .filter_map(|r| inner.requests.get(r))
            .filter(|r| r.granter == *granter && r.is_open())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl NotificationLog for MemoryStore {
    async fn notify(&self, recipient: &Identifier, message: &str) -> Result<()> {
        let notification = Notification {
            recipient: *recipient,
            message: message.to_string(),
            created_at: now_millis(),
        };
        self.write()?
            .notifications
            .entry(*recipient)
            .or_default()
            .push(notification);
        Ok(())
    }

    async fn notifications(&self, recipient: &Identifier) -> Result<Vec<Notification>> {
        Ok(self
            .read()?
            .notifications
            .get(recipient)
            .cloned()
            .unwrap_or_default())
    }
}
