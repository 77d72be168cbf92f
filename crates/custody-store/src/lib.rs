//! # Custody Store
//!
//! Interfaces to the external services the core depends on, plus two
//! reference backends that implement all of them.
//!
//! ## Overview
//!
//! The core never talks to a storage network or ledger directly. It goes
//! through the traits in [`traits`], so any backend that honours their
//! contracts can be plugged in. [`SqliteStore`] persists to disk;
//! [`MemoryStore`] is for tests.
//!
//! ## Key Types
//!
//! - [`ContentStore`] - Put/get opaque bytes by content identifier
//! - [`RecordIndex`] - Owner-keyed record metadata
//! - [`IdentityRegistry`] - Identifier to identity lookup
//! - [`PermissionLedger`] - Compare-and-set permission request log
//! - [`NotificationLog`] - Per-identity inbox
//! - [`Backend`] - Shorthand for a type implementing all five
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use custody_store::{ContentStore, SqliteStore};
//!
//! async fn example() -> custody_store::Result<()> {
//!     let store = SqliteStore::open("custody.db")?;
//!     let id = store.put(Bytes::from_static(b"ciphertext")).await?;
//!     let bytes = store.get(&id).await?;
//!     assert_eq!(&bytes[..], b"ciphertext");
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Content addressing**: both backends identify blobs by hex BLAKE3 and
//!   re-verify the hash on every read
//! - **Idempotent publish**: a record's reference is the hash of its
//!   canonical encoding, so republishing returns `AlreadyExists`
//! - **Compare-and-set decisions**: only an open request can be approved or
//!   denied; anything else comes back `Unchanged`

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    blake3_content_id, now_millis, Backend, ContentStore, IdentityRegistry, InsertResult, Notification,
    NotificationLog, PermissionLedger, RecordIndex,
};
