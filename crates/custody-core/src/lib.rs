//! # Custody Core
//!
//! Pure primitives for Custody: identities, content-derived identifiers,
//! record metadata and their canonical encoding.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over the data model shared by the cipher, the storage
//! collaborators and the permission protocol.
//!
//! ## Key Types
//!
//! - [`Identity`] - A participant: public key, derived identifier, role
//! - [`Identifier`] - Content hash of a public key
//! - [`PublicKey`] / [`PrivateKey`] - X25519 key pair halves
//! - [`WrappedKey`] - A content key sealed to one recipient
//! - [`RecordMetadata`] - What the record index stores per upload
//! - [`RecordRef`] / [`RequestRef`] - Ledger references
//! - [`ContentId`] - Opaque identifier assigned by the content store
//!
//! ## Encodings
//!
//! Internally every value is raw bytes. Text encodings (hex for identifiers,
//! base64 for byte payloads) are applied only at the serde boundary, see
//! [`codec`]. Record references are hashed over deterministic CBOR, see
//! [`canonical`].

pub mod canonical;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod record;
pub mod types;

pub use canonical::{canonical_record_bytes, decode_record};
pub use crypto::{ContentHash, PrivateKey, PublicKey};
pub use error::{CoreError, Result};
pub use identity::{Identity, Role};
pub use record::{RecordMetadata, WrappedKey, MAX_DATA_TYPE_LEN};
pub use types::{ContentId, Identifier, RecordRef, RequestRef};
