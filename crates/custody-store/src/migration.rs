//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::traits::now_millis;

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
        tracing::debug!(from = current, to = CURRENT_VERSION, "migrated schema");
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Encrypted blobs, addressed by hex BLAKE3 of their bytes
        CREATE TABLE blobs (
            content_id TEXT PRIMARY KEY,
            bytes BLOB NOT NULL,
            stored_at INTEGER NOT NULL
        );

        -- Record index; id gives publish order
        CREATE TABLE records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_ref BLOB NOT NULL UNIQUE,  -- 32 bytes, hash of canonical bytes
            owner BLOB NOT NULL,              -- 32 bytes, identifier
            recipient BLOB NOT NULL,          -- 32 bytes, identifier the key is wrapped for
            content_id TEXT NOT NULL,
            data_type TEXT NOT NULL,
            canonical_bytes BLOB NOT NULL,    -- canonical CBOR of the metadata
            published_at INTEGER NOT NULL
        );

        -- Identity registry
        CREATE TABLE identities (
            identifier BLOB PRIMARY KEY,      -- 32 bytes
            public_key BLOB NOT NULL,         -- 32 bytes, X25519
            role INTEGER NOT NULL,            -- Role ordinal
            registered_at INTEGER NOT NULL
        );

        -- Permission ledger; id gives filing order
        CREATE TABLE permission_requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            request_ref BLOB NOT NULL UNIQUE,
            requester BLOB NOT NULL,
            granter BLOB NOT NULL,
            record_ref BLOB NOT NULL,
            state TEXT NOT NULL,              -- requested | approved | denied
            granted_key BLOB,                 -- wrapped bytes for the requester once approved
            created_at INTEGER NOT NULL,
            decided_at INTEGER
        );

        -- Notification inboxes
        CREATE TABLE notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            recipient BLOB NOT NULL,
            message TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX idx_records_owner ON records(owner);
        CREATE INDEX idx_records_recipient ON records(recipient);
        CREATE INDEX idx_requests_granter_state ON permission_requests(granter, state);
        CREATE INDEX idx_requests_triple ON permission_requests(requester, granter, record_ref);
        CREATE INDEX idx_notifications_recipient ON notifications(recipient);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "blobs",
            "records",
            "identities",
            "permission_requests",
            "notifications",
            "schema_migrations",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn test_migration_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: u32 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (99, 0)",
            [],
        )
        .unwrap();

        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }
}
