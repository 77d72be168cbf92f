//! SQLite implementation of the collaborator traits.
//!
//! The persistent reference backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};

use custody_core::{
    canonical_record_bytes, decode_record, ContentId, Identifier, Identity, PublicKey,
    RecordMetadata, RecordRef, RequestRef, Role, WrappedKey,
};
use custody_perms::{derive_request_ref, PermissionRequest, RequestState, Transition};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    blake3_content_id, now_millis, ContentStore, IdentityRegistry, InsertResult, Notification,
    NotificationLog, PermissionLedger, RecordIndex,
};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All trait operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Register an identity. Re-registering the same identity is a no-op.
    pub async fn register(&self, identity: Identity) -> Result<InsertResult> {
        self.blocking(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO identities (identifier, public_key, role, registered_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    identity.identifier().as_bytes().as_slice(),
                    identity.public_key().as_bytes().as_slice(),
                    identity.role().to_u8(),
                    now_millis(),
                ],
            )?;
            Ok(if changed == 1 {
                InsertResult::Inserted
            } else {
                InsertResult::AlreadyExists
            })
        })
        .await
    }

    /// Run a blocking operation on the connection.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {}", e)))?
    }
}

/// Convert a BLOB column to a 32-byte array.
fn blob32(bytes: Vec<u8>, column: usize) -> rusqlite::Result<[u8; 32]> {
    bytes.try_into().map_err(|b: Vec<u8>| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Blob,
            format!("expected 32 bytes, got {}", b.len()).into(),
        )
    })
}

const REQUEST_COLUMNS: &str =
    "request_ref, requester, granter, record_ref, state, granted_key, created_at";

// Helper to convert a row to PermissionRequest
fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<PermissionRequest> {
    let requester = Identifier::from_bytes(blob32(row.get(1)?, 1)?);
    let state_text: String = row.get(4)?;
    let state = state_text.parse::<RequestState>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;
    let granted_key: Option<Vec<u8>> = row.get(5)?;

    Ok(PermissionRequest {
        request_ref: RequestRef::from_bytes(blob32(row.get(0)?, 0)?),
        requester,
        granter: Identifier::from_bytes(blob32(row.get(2)?, 2)?),
        record_ref: RecordRef::from_bytes(blob32(row.get(3)?, 3)?),
        state,
        granted_key: granted_key.map(|bytes| WrappedKey::new(requester, bytes)),
        created_at: row.get(6)?,
    })
}

fn load_request(conn: &Connection, request_ref: &RequestRef) -> Result<Option<PermissionRequest>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM permission_requests WHERE request_ref = ?1",
            REQUEST_COLUMNS
        ),
        params![request_ref.as_bytes().as_slice()],
        row_to_request,
    )
    .optional()
    .map_err(StoreError::from)
}

fn decode_records(rows: Vec<Vec<u8>>) -> Result<Vec<RecordMetadata>> {
    rows.iter()
        .map(|bytes| decode_record(bytes).map_err(StoreError::from))
        .collect()
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn put(&self, bytes: Bytes) -> Result<ContentId> {
        let id = blake3_content_id(&bytes);
        let len = bytes.len();
        let stored_id = id.clone();

        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO blobs (content_id, bytes, stored_at) VALUES (?1, ?2, ?3)",
                params![stored_id.as_str(), bytes.as_ref(), now_millis()],
            )?;
            Ok(())
        })
        .await?;

        tracing::debug!(content_id = %id, len, "stored blob");
        Ok(id)
    }

    async fn get(&self, id: &ContentId) -> Result<Bytes> {
        let id = id.clone();

        self.blocking(move |conn| {
            let bytes: Vec<u8> = conn
                .query_row(
                    "SELECT bytes FROM blobs WHERE content_id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("content {}", id)))?;

            if blake3_content_id(&bytes) != id {
                tracing::warn!(content_id = %id, "stored blob does not match its identifier");
                return Err(StoreError::Corrupt(format!("content {}", id)));
            }
            Ok(Bytes::from(bytes))
        })
        .await
    }
}

#[async_trait]
impl RecordIndex for SqliteStore {
    async fn publish(&self, record: &RecordMetadata) -> Result<(RecordRef, InsertResult)> {
        let record = record.clone();
        let record_ref = record.record_ref();

        let result = self
            .blocking(move |conn| {
                let changed = conn.execute(
                    "INSERT OR IGNORE INTO records (
                        record_ref, owner, recipient, content_id, data_type,
                        canonical_bytes, published_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        record_ref.as_bytes().as_slice(),
                        record.owner.as_bytes().as_slice(),
                        record.wrapped_key.recipient.as_bytes().as_slice(),
                        record.content_id.as_str(),
                        &record.data_type,
                        canonical_record_bytes(&record),
                        now_millis(),
                    ],
                )?;
                Ok(if changed == 1 {
                    InsertResult::Inserted
                } else {
                    InsertResult::AlreadyExists
                })
            })
            .await?;

        tracing::debug!(record_ref = %record_ref, ?result, "published record");
        Ok((record_ref, result))
    }

    async fn list_records(&self, owner: &Identifier) -> Result<Vec<RecordMetadata>> {
        let owner = *owner;

        let rows = self
            .blocking(move |conn| {
                let mut stmt = conn
                    .prepare("SELECT canonical_bytes FROM records WHERE owner = ?1 ORDER BY id")?;
                let rows = stmt
                    .query_map(params![owner.as_bytes().as_slice()], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;
                Ok(rows)
            })
            .await?;

        decode_records(rows)
    }

    async fn get_record(&self, record_ref: &RecordRef) -> Result<Option<RecordMetadata>> {
        let record_ref = *record_ref;

        let bytes: Option<Vec<u8>> = self
            .blocking(move |conn| {
                conn.query_row(
                    "SELECT canonical_bytes FROM records WHERE record_ref = ?1",
                    params![record_ref.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(StoreError::from)
            })
            .await?;

        bytes
            .map(|b| decode_record(&b).map_err(StoreError::from))
            .transpose()
    }

    async fn list_readable(&self, reader: &Identifier) -> Result<Vec<RecordMetadata>> {
        let reader = *reader;

        let rows = self
            .blocking(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT canonical_bytes FROM records WHERE recipient = ?1 ORDER BY id",
                )?;
                let rows = stmt
                    .query_map(params![reader.as_bytes().as_slice()], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;
                Ok(rows)
            })
            .await?;

        decode_records(rows)
    }
}

#[async_trait]
impl IdentityRegistry for SqliteStore {
    async fn resolve(&self, identifier: &Identifier) -> Result<Option<Identity>> {
        let identifier = *identifier;

        let row: Option<(Vec<u8>, u8)> = self
            .blocking(move |conn| {
                conn.query_row(
                    "SELECT public_key, role FROM identities WHERE identifier = ?1",
                    params![identifier.as_bytes().as_slice()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(StoreError::from)
            })
            .await?;

        let Some((public_key, role)) = row else {
            return Ok(None);
        };

        let public_key = PublicKey::from_bytes(blob32(public_key, 0)?);
        let role = Role::from_u8(role)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown role ordinal {}", role)))?;
        Ok(Some(Identity::from_parts(identifier, public_key, role)?))
    }
}

#[async_trait]
impl PermissionLedger for SqliteStore {
    async fn request(
        &self,
        requester: &Identifier,
        granter: &Identifier,
        record_ref: &RecordRef,
    ) -> Result<(PermissionRequest, InsertResult)> {
        let (requester, granter, record_ref) = (*requester, *granter, *record_ref);

        self.blocking(move |conn| {
            let tx = conn.transaction()?;

            let previous = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {} FROM permission_requests
                     WHERE requester = ?1 AND granter = ?2 AND record_ref = ?3
                     ORDER BY id",
                    REQUEST_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(
                        params![
                            requester.as_bytes().as_slice(),
                            granter.as_bytes().as_slice(),
                            record_ref.as_bytes().as_slice(),
                        ],
                        row_to_request,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };

            if let Some(open) = previous.iter().find(|r| r.is_open()) {
                return Ok((open.clone(), InsertResult::AlreadyExists));
            }

            let request_ref =
                derive_request_ref(&requester, &granter, &record_ref, previous.len() as u64);
            let request =
                PermissionRequest::new(request_ref, requester, granter, record_ref, now_millis());

            tx.execute(
                "INSERT INTO permission_requests (
                    request_ref, requester, granter, record_ref, state, granted_key, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)",
                params![
                    request.request_ref.as_bytes().as_slice(),
                    requester.as_bytes().as_slice(),
                    granter.as_bytes().as_slice(),
                    record_ref.as_bytes().as_slice(),
                    request.state.as_str(),
                    request.created_at,
                ],
            )?;
            tx.commit()?;

            tracing::debug!(request_ref = %request.request_ref, "filed permission request");
            Ok((request, InsertResult::Inserted))
        })
        .await
    }

    async fn approve(
        &self,
        request_ref: &RequestRef,
        granted_key: &WrappedKey,
    ) -> Result<Transition> {
        let request_ref = *request_ref;
        let granted_key = granted_key.clone();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;

            let mut request = load_request(&tx, &request_ref)?
                .ok_or_else(|| StoreError::NotFound(format!("request {}", request_ref)))?;

            if !request.approve(granted_key.clone())? {
                return Ok(Transition::Unchanged(request));
            }

            let changed = tx.execute(
                "UPDATE permission_requests
                 SET state = ?1, granted_key = ?2, decided_at = ?3
                 WHERE request_ref = ?4 AND state = ?5",
                params![
                    RequestState::Approved.as_str(),
                    granted_key.wrapped_bytes.as_slice(),
                    now_millis(),
                    request_ref.as_bytes().as_slice(),
                    RequestState::Requested.as_str(),
                ],
            )?;
            if changed != 1 {
                return Err(StoreError::InvalidData(format!(
                    "request {} changed during approval",
                    request_ref
                )));
            }
            tx.commit()?;

            tracing::debug!(request_ref = %request_ref, "approved permission request");
            Ok(Transition::Applied(request))
        })
        .await
    }

    async fn deny(&self, request_ref: &RequestRef) -> Result<Transition> {
        let request_ref = *request_ref;

        self.blocking(move |conn| {
            let tx = conn.transaction()?;

            let mut request = load_request(&tx, &request_ref)?
                .ok_or_else(|| StoreError::NotFound(format!("request {}", request_ref)))?;

            if !request.deny() {
                return Ok(Transition::Unchanged(request));
            }

            let changed = tx.execute(
                "UPDATE permission_requests SET state = ?1, decided_at = ?2
                 WHERE request_ref = ?3 AND state = ?4",
                params![
                    RequestState::Denied.as_str(),
                    now_millis(),
                    request_ref.as_bytes().as_slice(),
                    RequestState::Requested.as_str(),
                ],
            )?;
            if changed != 1 {
                return Err(StoreError::InvalidData(format!(
                    "request {} changed during denial",
                    request_ref
                )));
            }
            tx.commit()?;

            tracing::debug!(request_ref = %request_ref, "denied permission request");
            Ok(Transition::Applied(request))
        })
        .await
    }

    async fn status(&self, request_ref: &RequestRef) -> Result<Option<PermissionRequest>> {
        let request_ref = *request_ref;
        self.blocking(move |conn| load_request(conn, &request_ref))
            .await
    }

    async fn pending_for(&self, granter: &Identifier) -> Result<Vec<PermissionRequest>> {
        let granter = *granter;

        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM permission_requests
                 WHERE granter = ?1 AND state = ?2
                 ORDER BY id",
                REQUEST_COLUMNS
            ))?;
            let requests = stmt
                .query_map(
                    params![
                        granter.as_bytes().as_slice(),
                        RequestState::Requested.as_str()
                    ],
                    row_to_request,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(requests)
        })
        .await
    }
}

#[async_trait]
impl NotificationLog for SqliteStore {
    async fn notify(&self, recipient: &Identifier, message: &str) -> Result<()> {
        let recipient = *recipient;
        let message = message.to_string();

        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO notifications (recipient, message, created_at) VALUES (?1, ?2, ?3)",
                params![recipient.as_bytes().as_slice(), message, now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    async fn notifications(&self, recipient: &Identifier) -> Result<Vec<Notification>> {
        let recipient = *recipient;

        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT message, created_at FROM notifications
                 WHERE recipient = ?1 ORDER BY id",
            )?;
            let notifications = stmt
                .query_map(params![recipient.as_bytes().as_slice()], |row| {
                    Ok(Notification {
                        recipient,
                        message: row.get(0)?,
                        created_at: row.get(1)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(notifications)
        })
        .await
    }
}
