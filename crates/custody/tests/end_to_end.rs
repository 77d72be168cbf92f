//! End-to-end flows through the Custodian.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use custody::perms::{EncryptedBlob, EnvelopeConfig, PermsError, Transition};
use custody::store::{
    ContentStore, IdentityRegistry, InsertResult, NotificationLog, PermissionLedger,
    RecordIndex, StoreError,
};
use custody::{
    meta_keys, AccessRequest, AuxMeta, ContentId, CustodyConfig, CustodyError, Custodian,
    Identifier, Identity, MemoryStore, Notification, PermissionRequest, RecordMetadata, RecordRef,
    RequestRef, RequestState, RetryPolicy, Role, WrappedKey,
};
use custody_testkit::{memory_store_with, multi_party, sqlite_store_with, Party};

fn fast_config() -> CustodyConfig {
    CustodyConfig {
        fetch_retry: RetryPolicy {
            max_attempts: 4,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        },
        ..CustodyConfig::default()
    }
}

fn expect_requested(outcome: AccessRequest) -> PermissionRequest {
    match outcome {
        AccessRequest::Requested(request) => request,
        AccessRequest::AlreadyGranted => panic!("expected a filed request"),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn patient_and_provider() -> (Party, Party) {
    (Party::new(Role::Patient), Party::new(Role::CareProvider))
}

#[tokio::test]
async fn lab_result_reaches_approved_reader() -> anyhow::Result<()> {
    init_tracing();
    let (owner, reader) = patient_and_provider();
    let custodian = Custodian::new(memory_store_with(&[&owner, &reader]), fast_config())?;

    let upload = custodian
        .upload(&owner.identity, "lab", b"lab-result-42", AuxMeta::new())
        .await?;
    assert_eq!(upload.inserted, InsertResult::Inserted);
    assert_eq!(custodian.list_records(&owner.id()).await?, vec![upload.record.clone()]);
    assert_eq!(custodian.open_record(&upload.record_ref, &owner.key).await?, b"lab-result-42");

    // Nothing readable until approval.
    assert!(custodian.list_readable(&reader.id()).await?.is_empty());
    assert!(custodian.open_record(&upload.record_ref, &reader.key).await.unwrap_err().is_unwrap());

    let request = expect_requested(
        custodian
            .request_access(&reader.id(), &owner.id(), &upload.record_ref)
            .await?,
    );
    assert_eq!(request.state, RequestState::Requested);
    assert_eq!(custodian.pending_requests(&owner.id()).await?, vec![request.clone()]);

    let approved = custodian.approve_access(&request.request_ref, &owner.key).await?;
    assert_eq!(approved.state, RequestState::Approved);
    assert!(custodian.pending_requests(&owner.id()).await?.is_empty());

    let readable = custodian.list_readable(&reader.id()).await?;
    assert_eq!(readable.len(), 1);
    assert_eq!(readable[0].owner, owner.id());
    assert_eq!(readable[0].content_id, upload.content_id);
    assert_eq!(custodian.open(&readable[0], &reader.key).await?, b"lab-result-42");

    // Retried approval republishes the same key.
    let again = custodian.approve_access(&request.request_ref, &owner.key).await?;
    assert_eq!(again.granted_key, approved.granted_key);
    assert_eq!(custodian.list_readable(&reader.id()).await?, readable);

    // Once granted, a new request short-circuits.
    assert_eq!(
        custodian
            .request_access(&reader.id(), &owner.id(), &upload.record_ref)
            .await?,
        AccessRequest::AlreadyGranted
    );
    Ok(())
}

#[tokio::test]
async fn owner_never_needs_to_ask() -> anyhow::Result<()> {
    let (owner, reader) = patient_and_provider();
    let custodian = Custodian::new(memory_store_with(&[&owner, &reader]), fast_config())?;
    let upload = custodian.upload(&owner.identity, "lab", b"x", AuxMeta::new()).await?;

    assert_eq!(
        custodian
            .request_access(&owner.id(), &owner.id(), &upload.record_ref)
            .await?,
        AccessRequest::AlreadyGranted
    );
    assert!(custodian.pending_requests(&owner.id()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn repeated_request_returns_open_one_and_notifies_once() -> anyhow::Result<()> {
    let (owner, reader) = patient_and_provider();
    let custodian = Custodian::new(memory_store_with(&[&owner, &reader]), fast_config())?;
    let upload = custodian.upload(&owner.identity, "lab", b"x", AuxMeta::new()).await?;

    let first = expect_requested(
        custodian
            .request_access(&reader.id(), &owner.id(), &upload.record_ref)
            .await?,
    );
    let second = expect_requested(
        custodian
            .request_access(&reader.id(), &owner.id(), &upload.record_ref)
            .await?,
    );
    assert_eq!(first.request_ref, second.request_ref);

    let inbox = custodian.notifications(&owner.id()).await?;
    assert_eq!(inbox.len(), 1);
    assert!(inbox[0].message.contains(&upload.record_ref.to_hex()));
    Ok(())
}

#[tokio::test]
async fn denied_request_never_yields_a_key() -> anyhow::Result<()> {
    let (owner, reader) = patient_and_provider();
    let custodian = Custodian::new(memory_store_with(&[&owner, &reader]), fast_config())?;
    let upload = custodian.upload(&owner.identity, "lab", b"secret", AuxMeta::new()).await?;
    let request = expect_requested(
        custodian
            .request_access(&reader.id(), &owner.id(), &upload.record_ref)
            .await?,
    );

    // Only the granter may decide.
    assert!(matches!(
        custodian.deny_access(&request.request_ref, &reader.id()).await,
        Err(CustodyError::NotAuthorized(_))
    ));

    let denied = custodian.deny_access(&request.request_ref, &owner.id()).await?;
    assert_eq!(denied.state, RequestState::Denied);
    assert!(denied.granted_key.is_none());

    // Approval after denial is a no-op.
    let after = custodian.approve_access(&request.request_ref, &owner.key).await?;
    assert_eq!(after.state, RequestState::Denied);
    assert!(after.granted_key.is_none());
    assert!(custodian.list_readable(&reader.id()).await?.is_empty());

    // Denying twice does not notify twice.
    custodian.deny_access(&request.request_ref, &owner.id()).await?;
    let inbox = custodian.notifications(&reader.id()).await?;
    assert_eq!(inbox.len(), 1);
    assert!(inbox[0].message.contains("denied"));

    // A fresh request can be filed after a denial.
    let retry = expect_requested(
        custodian
            .request_access(&reader.id(), &owner.id(), &upload.record_ref)
            .await?,
    );
    assert_ne!(retry.request_ref, request.request_ref);
    Ok(())
}

#[tokio::test]
async fn approval_requires_the_granter_key() -> anyhow::Result<()> {
    let parties = multi_party(3);
    let (owner, reader, outsider) = (&parties[0], &parties[1], &parties[2]);
    let custodian = Custodian::new(memory_store_with(&[owner, reader, outsider]), fast_config())?;
    let upload = custodian.upload(&owner.identity, "lab", b"x", AuxMeta::new()).await?;
    let request = expect_requested(
        custodian
            .request_access(&reader.id(), &owner.id(), &upload.record_ref)
            .await?,
    );

    let err = custodian
        .approve_access(&request.request_ref, &outsider.key)
        .await
        .unwrap_err();
    assert!(err.is_unwrap(), "unexpected error: {}", err);
    assert_eq!(
        custodian.request_status(&request.request_ref).await?.state,
        RequestState::Requested
    );
    Ok(())
}

#[tokio::test]
async fn request_access_rejects_bad_parties() -> anyhow::Result<()> {
    let parties = multi_party(3);
    let (owner, reader, stranger) = (&parties[0], &parties[1], &parties[2]);
    // `stranger` is never registered.
    let custodian = Custodian::new(memory_store_with(&[owner, reader]), fast_config())?;
    let upload = custodian.upload(&owner.identity, "lab", b"x", AuxMeta::new()).await?;

    assert!(matches!(
        custodian
            .request_access(&reader.id(), &stranger.id(), &upload.record_ref)
            .await,
        Err(CustodyError::NotAuthorized(_))
    ));
    assert!(matches!(
        custodian
            .request_access(&stranger.id(), &owner.id(), &upload.record_ref)
            .await,
        Err(CustodyError::UnknownIdentity(id)) if id == stranger.id()
    ));

    let missing = RecordRef::from_bytes([9; 32]);
    assert!(matches!(
        custodian.request_access(&reader.id(), &owner.id(), &missing).await,
        Err(CustodyError::RecordNotFound(r)) if r == missing
    ));
    assert!(matches!(
        custodian
            .approve_access(&RequestRef::from_bytes([9; 32]), &owner.key)
            .await,
        Err(CustodyError::RequestNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn failed_rewrap_leaves_request_open() -> anyhow::Result<()> {
    let (owner, reader) = patient_and_provider();
    let store = memory_store_with(&[&owner, &reader]);
    let content_id = store.put(Bytes::from_static(b"{}")).await?;
    let broken = RecordMetadata::new(
        owner.id(),
        "lab",
        content_id,
        WrappedKey::new(owner.id(), vec![0u8; 92]),
    )?;
    let (record_ref, _) = store.publish(&broken).await?;
    let custodian = Custodian::new(store, fast_config())?;

    let request = expect_requested(
        custodian
            .request_access(&reader.id(), &owner.id(), &record_ref)
            .await?,
    );
    let err = custodian
        .approve_access(&request.request_ref, &owner.key)
        .await
        .unwrap_err();
    assert!(err.is_unwrap(), "unexpected error: {}", err);

    let status = custodian.request_status(&request.request_ref).await?;
    assert_eq!(status.state, RequestState::Requested);
    assert!(custodian.list_readable(&reader.id()).await?.is_empty());
    assert!(custodian.notifications(&reader.id()).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn empty_and_oversized_payloads() -> anyhow::Result<()> {
    let owner = Party::new(Role::Patient);
    let config = CustodyConfig {
        envelope: EnvelopeConfig {
            max_plaintext_len: 16,
        },
        ..fast_config()
    };
    let custodian = Custodian::new(memory_store_with(&[&owner]), config)?;

    let empty = custodian.upload(&owner.identity, "note", b"", AuxMeta::new()).await?;
    assert!(custodian.open_record(&empty.record_ref, &owner.key).await?.is_empty());

    let at_limit = custodian
        .upload(&owner.identity, "note", &[7u8; 16], AuxMeta::new())
        .await?;
    assert_eq!(custodian.open_record(&at_limit.record_ref, &owner.key).await?, [7u8; 16]);

    let err = custodian
        .upload(&owner.identity, "note", &[7u8; 17], AuxMeta::new())
        .await
        .unwrap_err();
    assert!(matches!(err, CustodyError::Permission(PermsError::Encoding(_))));

    // The rejected upload stored and published nothing.
    assert_eq!(custodian.store().blob_count()?, 2);
    assert_eq!(custodian.list_records(&owner.id()).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn upload_file_records_meta() -> anyhow::Result<()> {
    let owner = Party::new(Role::Patient);
    let custodian = Custodian::new(memory_store_with(&[&owner]), fast_config())?;

    let upload = custodian
        .upload_file(&owner.identity, "imaging", "scan.png", "image/png", &[1, 2, 3, 4])
        .await?;

    let stored = custodian.store().get(&upload.content_id).await?;
    let blob = EncryptedBlob::from_bytes(&stored)?;
    assert_eq!(blob.meta[meta_keys::FILENAME], "scan.png");
    assert_eq!(blob.meta[meta_keys::MIMETYPE], "image/png");
    assert_eq!(blob.meta[meta_keys::ORIGINAL_SIZE], "4");
    assert!(blob.meta[meta_keys::UPLOADED_AT].parse::<i64>()? > 0);

    assert_eq!(custodian.open_record(&upload.record_ref, &owner.key).await?, [1, 2, 3, 4]);
    Ok(())
}

#[tokio::test]
async fn sqlite_backend_survives_reopen() -> anyhow::Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("custody.db");
    let (owner, reader) = patient_and_provider();

    let request_ref = {
        let custodian =
            Custodian::new(sqlite_store_with(&path, &[&owner, &reader]).await, fast_config())?;
        let upload = custodian
            .upload(&owner.identity, "lab", b"lab-result-42", AuxMeta::new())
            .await?;
        let request = expect_requested(
            custodian
                .request_access(&reader.id(), &owner.id(), &upload.record_ref)
                .await?,
        );
        request.request_ref
    };

    let custodian = Custodian::new(custody::SqliteStore::open(&path)?, fast_config())?;
    assert_eq!(custodian.pending_requests(&owner.id()).await?.len(), 1);
    custodian.approve_access(&request_ref, &owner.key).await?;

    let readable = custodian.list_readable(&reader.id()).await?;
    assert_eq!(readable.len(), 1);
    assert_eq!(custodian.open(&readable[0], &reader.key).await?, b"lab-result-42");

    let inbox = custodian.notifications(&reader.id()).await?;
    assert!(inbox.iter().any(|n| n.message.contains("approved")));
    Ok(())
}

#[tokio::test]
async fn corrupted_sqlite_blob_is_an_integrity_failure() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("custody.db");
    let owner = Party::new(Role::Patient);
    let custodian = Custodian::new(sqlite_store_with(&path, &[&owner]).await, fast_config())?;
    let upload = custodian
        .upload(&owner.identity, "lab", b"lab-result-42", AuxMeta::new())
        .await?;

    let conn = rusqlite::Connection::open(&path)?;
    let mut bytes: Vec<u8> = conn.query_row(
        "SELECT bytes FROM blobs WHERE content_id = ?1",
        [upload.content_id.as_str()],
        |row| row.get(0),
    )?;
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    conn.execute(
        "UPDATE blobs SET bytes = ?1 WHERE content_id = ?2",
        rusqlite::params![bytes, upload.content_id.as_str()],
    )?;

    let err = custodian
        .open_record(&upload.record_ref, &owner.key)
        .await
        .unwrap_err();
    assert!(err.is_integrity(), "unexpected error: {}", err);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Unreliable content store
// ─────────────────────────────────────────────────────────────────────────────

/// Delegates to a MemoryStore, but `get` first reports missing content,
/// then corrupt content, then serves tampered blobs for a configured
/// number of calls.
struct Unreliable {
    inner: MemoryStore,
    missing: AtomicUsize,
    corrupt: AtomicUsize,
    tampered: AtomicUsize,
    gets: Arc<AtomicUsize>,
}

impl Unreliable {
    fn new(inner: MemoryStore, missing: usize, tampered: usize) -> Self {
        Self {
            inner,
            missing: AtomicUsize::new(missing),
            corrupt: AtomicUsize::new(0),
            tampered: AtomicUsize::new(tampered),
            gets: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ContentStore for Unreliable {
    async fn put(&self, bytes: Bytes) -> custody::store::Result<ContentId> {
        self.inner.put(bytes).await
    }

    async fn get(&self, id: &ContentId) -> custody::store::Result<Bytes> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.missing) {
            return Err(StoreError::NotFound(format!("content {}", id)));
        }
        if Self::take(&self.corrupt) {
            return Err(StoreError::Corrupt(format!("content {}", id)));
        }
        let bytes = self.inner.get(id).await?;
        if Self::take(&self.tampered) {
            let mut blob = EncryptedBlob::from_bytes(&bytes)
                .map_err(|e| StoreError::InvalidData(e.to_string()))?;
            blob.meta.insert("filename".into(), "renamed.txt".into());
            let bytes = blob
                .to_bytes()
                .map_err(|e| StoreError::InvalidData(e.to_string()))?;
            return Ok(Bytes::from(bytes));
        }
        Ok(bytes)
    }
}

#[async_trait]
impl RecordIndex for Unreliable {
    async fn publish(
        &self,
        record: &RecordMetadata,
    ) -> custody::store::Result<(RecordRef, InsertResult)> {
        self.inner.publish(record).await
    }

    async fn list_records(&self, owner: &Identifier) -> custody::store::Result<Vec<RecordMetadata>> {
        self.inner.list_records(owner).await
    }

    async fn get_record(
        &self,
        record_ref: &RecordRef,
    ) -> custody::store::Result<Option<RecordMetadata>> {
        self.inner.get_record(record_ref).await
    }

    async fn list_readable(
        &self,
        reader: &Identifier,
    ) -> custody::store::Result<Vec<RecordMetadata>> {
        self.inner.list_readable(reader).await
    }
}

#[async_trait]
impl IdentityRegistry for Unreliable {
    async fn resolve(&self, identifier: &Identifier) -> custody::store::Result<Option<Identity>> {
        self.inner.resolve(identifier).await
    }
}

#[async_trait]
impl PermissionLedger for Unreliable {
    async fn request(
        &self,
        requester: &Identifier,
        granter: &Identifier,
        record_ref: &RecordRef,
    ) -> custody::store::Result<(PermissionRequest, InsertResult)> {
        self.inner.request(requester, granter, record_ref).await
    }

    async fn approve(
        &self,
        request_ref: &RequestRef,
        granted_key: &WrappedKey,
    ) -> custody::store::Result<Transition> {
        self.inner.approve(request_ref, granted_key).await
    }

    async fn deny(&self, request_ref: &RequestRef) -> custody::store::Result<Transition> {
        self.inner.deny(request_ref).await
    }

    async fn status(
        &self,
        request_ref: &RequestRef,
    ) -> custody::store::Result<Option<PermissionRequest>> {
        self.inner.status(request_ref).await
    }

    async fn pending_for(
        &self,
        granter: &Identifier,
    ) -> custody::store::Result<Vec<PermissionRequest>> {
        self.inner.pending_for(granter).await
    }
}

#[async_trait]
impl NotificationLog for Unreliable {
    async fn notify(&self, recipient: &Identifier, message: &str) -> custody::store::Result<()> {
        self.inner.notify(recipient, message).await
    }

    async fn notifications(
        &self,
        recipient: &Identifier,
    ) -> custody::store::Result<Vec<Notification>> {
        self.inner.notifications(recipient).await
    }
}

async fn upload_through(
    missing: usize,
    tampered: usize,
) -> anyhow::Result<(Custodian<Unreliable>, Party, RecordRef, Arc<AtomicUsize>)> {
    let owner = Party::new(Role::Patient);
    let store = Unreliable::new(memory_store_with(&[&owner]), missing, tampered);
    let gets = store.gets.clone();
    let custodian = Custodian::new(store, fast_config())?;
    let mut meta = AuxMeta::new();
    meta.insert("filename".into(), "result.txt".into());
    let upload = custodian
        .upload(&owner.identity, "lab", b"lab-result-42", meta)
        .await?;
    Ok((custodian, owner, upload.record_ref, gets))
}

#[tokio::test]
async fn fetch_retries_missing_content() -> anyhow::Result<()> {
    let (custodian, owner, record_ref, gets) = upload_through(3, 0).await?;

    assert_eq!(custodian.open_record(&record_ref, &owner.key).await?, b"lab-result-42");
    assert_eq!(gets.load(Ordering::SeqCst), 4);
    Ok(())
}

#[tokio::test]
async fn fetch_gives_up_after_max_attempts() -> anyhow::Result<()> {
    let (custodian, owner, record_ref, gets) = upload_through(10, 0).await?;

    let err = custodian.open_record(&record_ref, &owner.key).await.unwrap_err();
    assert!(matches!(err, CustodyError::Store(ref e) if e.is_not_found()));
    assert_eq!(gets.load(Ordering::SeqCst), 4);
    Ok(())
}

#[tokio::test]
async fn tampered_blob_is_refetched_once() -> anyhow::Result<()> {
    let (custodian, owner, record_ref, gets) = upload_through(0, 1).await?;

    assert_eq!(custodian.open_record(&record_ref, &owner.key).await?, b"lab-result-42");
    assert_eq!(gets.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn repeated_tampering_is_surfaced() -> anyhow::Result<()> {
    let (custodian, owner, record_ref, gets) = upload_through(0, 5).await?;

    let err = custodian.open_record(&record_ref, &owner.key).await.unwrap_err();
    assert!(err.is_integrity(), "unexpected error: {}", err);
    assert_eq!(gets.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn corrupt_content_is_refetched_once() -> anyhow::Result<()> {
    let (custodian, owner, record_ref, gets) = upload_through(0, 0).await?;
    custodian.store().corrupt.store(1, Ordering::SeqCst);

    assert_eq!(custodian.open_record(&record_ref, &owner.key).await?, b"lab-result-42");
    assert_eq!(gets.load(Ordering::SeqCst), 2);

    custodian.store().corrupt.store(2, Ordering::SeqCst);
    let err = custodian.open_record(&record_ref, &owner.key).await.unwrap_err();
    assert!(err.is_integrity(), "unexpected error: {}", err);
    assert_eq!(gets.load(Ordering::SeqCst), 4);
    Ok(())
}
