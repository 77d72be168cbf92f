//! The Custodian: unified API for Custody.
//!
//! The Custodian drives the envelope cipher against the collaborator
//! backend: it uploads records, files and decides permission requests,
//! and opens records for their readers.
//!
//! Private keys are passed per call and never held by the Custodian.

use std::sync::Arc;

use bytes::Bytes;

use custody_core::{
    ContentId, Identifier, Identity, PrivateKey, RecordMetadata, RecordRef, RequestRef,
};
use custody_perms::{
    rewrap_key, AccessRequest, AuxMeta, EncryptedBlob, EnvelopeCipher, PermissionRequest,
    PermsError, RequestState, Transition,
};
use custody_store::{now_millis, Backend, InsertResult, Notification, StoreError};

use crate::config::CustodyConfig;
use crate::error::{CustodyError, Result};

/// Meta keys written by [`Custodian::upload_file`].
pub mod meta_keys {
    pub const FILENAME: &str = "filename";
    pub const MIMETYPE: &str = "mimetype";
    pub const ORIGINAL_SIZE: &str = "originalSize";
    pub const UPLOADED_AT: &str = "uploadedAt";
}

/// What an upload produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Reference of the published record.
    pub record_ref: RecordRef,
    /// Identifier the content store assigned to the blob.
    pub content_id: ContentId,
    /// The published metadata.
    pub record: RecordMetadata,
    /// Whether identical metadata was already published.
    pub inserted: InsertResult,
}

/// The main Custodian struct.
///
/// Provides a unified API for:
/// - Uploading encrypted records
/// - Listing owned and readable records
/// - Requesting, approving and denying access
/// - Opening records
pub struct Custodian<S: Backend> {
    /// The collaborator backend.
    store: Arc<S>,
    /// Payload cipher.
    cipher: EnvelopeCipher,
    /// Configuration.
    config: CustodyConfig,
}

impl<S: Backend> Custodian<S> {
    /// Create a new custodian over a backend.
    pub fn new(store: S, config: CustodyConfig) -> Result<Self> {
        Self::from_shared(Arc::new(store), config)
    }

    /// Create a custodian over a backend shared with other components.
    pub fn from_shared(store: Arc<S>, config: CustodyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            cipher: EnvelopeCipher::new(config.envelope.clone()),
            store,
            config,
        })
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the configuration.
    pub fn config(&self) -> &CustodyConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────────

    /// Encrypt a payload for its owner, store it and publish the record.
    ///
    /// The blob is put before the record is published; a failed put
    /// publishes nothing.
    pub async fn upload(
        &self,
        owner: &Identity,
        data_type: &str,
        plaintext: &[u8],
        meta: AuxMeta,
    ) -> Result<UploadReceipt> {
        let (blob, wrapped_key) =
            self.cipher
                .encrypt_with_meta(plaintext, owner.public_key(), meta)?;
        let stored = blob.to_bytes()?;
        let stored_len = stored.len();

        let content_id = self.store.put(Bytes::from(stored)).await?;
        let record = RecordMetadata::new(owner.identifier(), data_type, content_id.clone(), wrapped_key)?;
        let (record_ref, inserted) = self.store.publish(&record).await?;

        tracing::info!(
            owner = %owner.identifier(),
            record_ref = %record_ref,
            content_id = %content_id,
            plaintext_len = plaintext.len(),
            stored_len,
            "uploaded record"
        );

        Ok(UploadReceipt {
            record_ref,
            content_id,
            record,
            inserted,
        })
    }

    /// Upload a file, recording its name, type, size and upload time as meta.
    pub async fn upload_file(
        &self,
        owner: &Identity,
        data_type: &str,
        filename: &str,
        mimetype: &str,
        contents: &[u8],
    ) -> Result<UploadReceipt> {
        let mut meta = AuxMeta::new();
        meta.insert(meta_keys::FILENAME.into(), filename.into());
        meta.insert(meta_keys::MIMETYPE.into(), mimetype.into());
        meta.insert(meta_keys::ORIGINAL_SIZE.into(), contents.len().to_string());
        meta.insert(meta_keys::UPLOADED_AT.into(), now_millis().to_string());
        self.upload(owner, data_type, contents, meta).await
    }

    /// Records owned by `owner`, in publish order.
    pub async fn list_records(&self, owner: &Identifier) -> Result<Vec<RecordMetadata>> {
        Ok(self.store.list_records(owner).await?)
    }

    /// Records `reader` holds a wrapped key for, in publish order.
    pub async fn list_readable(&self, reader: &Identifier) -> Result<Vec<RecordMetadata>> {
        Ok(self.store.list_readable(reader).await?)
    }

    /// Get a record by reference.
    pub async fn get_record(&self, record_ref: &RecordRef) -> Result<RecordMetadata> {
        self.store
            .get_record(record_ref)
            .await?
            .ok_or(CustodyError::RecordNotFound(*record_ref))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Permission Protocol
    // ─────────────────────────────────────────────────────────────────────────

    /// Ask `granter` for access to a record.
    ///
    /// Returns `AlreadyGranted` without touching the ledger when the
    /// requester owns the record or already holds a key for its content.
    /// While a request for the same record is still open, that request is
    /// returned and the granter is not notified again.
    pub async fn request_access(
        &self,
        requester: &Identifier,
        granter: &Identifier,
        record_ref: &RecordRef,
    ) -> Result<AccessRequest> {
        let record = self.get_record(record_ref).await?;
        if record.owner != *granter {
            return Err(CustodyError::NotAuthorized(format!(
                "{} does not own record {}",
                granter, record_ref
            )));
        }

        if record.owner == *requester || self.holds_key(requester, &record.content_id).await? {
            tracing::debug!(requester = %requester, record_ref = %record_ref, "access already granted");
            return Ok(AccessRequest::AlreadyGranted);
        }

        self.resolve(requester).await?;

        let (request, filed) = self.store.request(requester, granter, record_ref).await?;
        if filed == InsertResult::Inserted {
            self.store
                .notify(
                    granter,
                    &format!("you have a new access request for record {}", record_ref.to_hex()),
                )
                .await?;
            tracing::info!(
                request_ref = %request.request_ref,
                requester = %requester,
                granter = %granter,
                record_ref = %record_ref,
                "filed access request"
            );
        }

        Ok(AccessRequest::Requested(request))
    }

    /// Approve a request with the granter's private key.
    ///
    /// The record's content key is rewrapped for the requester, the
    /// approval is recorded in the ledger, and the requester's copy of the
    /// record is published. Approving an already-approved request
    /// republishes the stored key; a denied request is returned unchanged.
    /// If the rewrap fails, including because `granter_key` is not the
    /// granter's key, the request stays open and an unwrap error is returned.
    pub async fn approve_access(
        &self,
        request_ref: &RequestRef,
        granter_key: &PrivateKey,
    ) -> Result<PermissionRequest> {
        let request = self.request_status(request_ref).await?;
        let caller = Identifier::derive(&granter_key.public_key());
        if caller != request.granter {
            tracing::warn!(request_ref = %request_ref, caller = %caller, "approval with a key other than the granter's");
            return Err(PermsError::Unwrap(format!(
                "key of {} cannot open the content key held by {}",
                caller, request.granter
            ))
            .into());
        }

        let record = self.owner_copy(&request.record_ref, &request.granter).await?;

        match request.state {
            RequestState::Denied => return Ok(request),
            RequestState::Approved => {
                self.publish_grant(&record, &request).await?;
                return Ok(request);
            }
            RequestState::Requested => {}
        }

        let requester = self.resolve(&request.requester).await?;
        let granted_key = rewrap_key(&record.wrapped_key, granter_key, requester.public_key())
            .map_err(|e| {
                tracing::warn!(request_ref = %request_ref, "rewrap failed, request left open");
                e
            })?;

        let transition = self.store.approve(request_ref, &granted_key).await?;
        let applied = transition.was_applied();
        let request = transition.into_request();
        // Lost a race with a deny: nothing to publish.
        if request.state != RequestState::Approved {
            return Ok(request);
        }
        self.publish_grant(&record, &request).await?;

        if applied {
            self.store
                .notify(
                    &request.requester,
                    &format!(
                        "your access request for record {} was approved",
                        request.record_ref.to_hex()
                    ),
                )
                .await?;
            tracing::info!(
                request_ref = %request_ref,
                requester = %request.requester,
                record_ref = %request.record_ref,
                "approved access request"
            );
        }

        Ok(request)
    }

    /// Deny a request. Only the granter may deny.
    pub async fn deny_access(
        &self,
        request_ref: &RequestRef,
        granter: &Identifier,
    ) -> Result<PermissionRequest> {
        let request = self.request_status(request_ref).await?;
        if request.granter != *granter {
            return Err(CustodyError::NotAuthorized(format!(
                "{} is not the granter of request {}",
                granter, request_ref
            )));
        }

        match self.store.deny(request_ref).await? {
            Transition::Applied(request) => {
                self.store
                    .notify(
                        &request.requester,
                        &format!(
                            "your access request for record {} was denied",
                            request.record_ref.to_hex()
                        ),
                    )
                    .await?;
                tracing::info!(request_ref = %request_ref, requester = %request.requester, "denied access request");
                Ok(request)
            }
            Transition::Unchanged(request) => Ok(request),
        }
    }

    /// Current state of a request.
    pub async fn request_status(&self, request_ref: &RequestRef) -> Result<PermissionRequest> {
        self.store
            .status(request_ref)
            .await?
            .ok_or(CustodyError::RequestNotFound(*request_ref))
    }

    /// Open requests waiting on `granter`, oldest first.
    pub async fn pending_requests(&self, granter: &Identifier) -> Result<Vec<PermissionRequest>> {
        Ok(self.store.pending_for(granter).await?)
    }

    /// Inbox of `recipient`, oldest first.
    pub async fn notifications(&self, recipient: &Identifier) -> Result<Vec<Notification>> {
        Ok(self.store.notifications(recipient).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reading
    // ─────────────────────────────────────────────────────────────────────────

    /// Fetch and decrypt a record by reference.
    pub async fn open_record(&self, record_ref: &RecordRef, reader_key: &PrivateKey) -> Result<Vec<u8>> {
        let record = self.get_record(record_ref).await?;
        self.open(&record, reader_key).await
    }

    /// Fetch and decrypt a record.
    ///
    /// A blob that fails authentication, or that the store reports as
    /// corrupt, is fetched once more; a second failure is returned.
    pub async fn open(&self, record: &RecordMetadata, reader_key: &PrivateKey) -> Result<Vec<u8>> {
        match self.fetch_and_decrypt(record, reader_key).await {
            Err(e) if e.is_integrity() => {
                tracing::warn!(content_id = %record.content_id, error = %e, "blob failed integrity check, refetching");
                self.fetch_and_decrypt(record, reader_key).await
            }
            other => other,
        }
    }

    async fn fetch_and_decrypt(&self, record: &RecordMetadata, reader_key: &PrivateKey) -> Result<Vec<u8>> {
        let blob = self.fetch_blob(&record.content_id).await?;
        Ok(self.cipher.decrypt(&blob, &record.wrapped_key, reader_key)?)
    }

    /// Fetch and parse a blob, retrying `NotFound` with backoff.
    async fn fetch_blob(&self, content_id: &ContentId) -> Result<EncryptedBlob> {
        let policy = &self.config.fetch_retry;
        let mut attempt = 0;
        let bytes = loop {
            match self.store.get(content_id).await {
                Ok(bytes) => break bytes,
                Err(e) if e.is_not_found() && attempt + 1 < policy.max_attempts => {
                    let delay = policy.backoff(attempt);
                    tracing::debug!(content_id = %content_id, attempt, ?delay, "content not found, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };
        Ok(EncryptedBlob::from_bytes(&bytes)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    async fn resolve(&self, identifier: &Identifier) -> Result<Identity> {
        self.store
            .resolve(identifier)
            .await?
            .ok_or(CustodyError::UnknownIdentity(*identifier))
    }

    async fn holds_key(&self, reader: &Identifier, content_id: &ContentId) -> Result<bool> {
        Ok(self
            .store
            .list_readable(reader)
            .await?
            .iter()
            .any(|r| r.content_id == *content_id))
    }

    /// The owner's own copy of a record: the one whose key the owner can unwrap.
    async fn owner_copy(&self, record_ref: &RecordRef, owner: &Identifier) -> Result<RecordMetadata> {
        let record = self.get_record(record_ref).await?;
        if record.owner != *owner {
            return Err(CustodyError::NotAuthorized(format!(
                "{} does not own record {}",
                owner, record_ref
            )));
        }
        if record.is_readable_by(owner) {
            return Ok(record);
        }
        self.store
            .list_readable(owner)
            .await?
            .into_iter()
            .find(|r| r.owner == *owner && r.content_id == record.content_id)
            .ok_or(CustodyError::RecordNotFound(*record_ref))
    }

    /// Publish the requester's copy of an approved record.
    async fn publish_grant(&self, record: &RecordMetadata, request: &PermissionRequest) -> Result<()> {
        let Some(granted_key) = request.granted_key.clone() else {
            return Err(StoreError::InvalidData(format!(
                "approved request {} has no granted key",
                request.request_ref
            ))
            .into());
        };
        let (reader_ref, inserted) = self.store.publish(&record.for_reader(granted_key)).await?;
        tracing::debug!(record_ref = %reader_ref, ?inserted, "published reader record");
        Ok(())
    }
}
