//! # Custody
//!
//! Encrypted records in content-addressed storage, readable only by the
//! identities their owner approves.
//!
//! ## Overview
//!
//! An owner uploads a payload: it is sealed under a fresh content key, the
//! ciphertext goes to the content store, and the record index gets the
//! content key wrapped for the owner. Another identity asks for access; when
//! the owner approves, the key is rewrapped for the requester and a second
//! record, addressed to the requester, is published. The payload is never
//! re-encrypted.
//!
//! ## Quick Start
//!
//! ```rust
//! use custody::{AccessRequest, CustodyConfig, Custodian};
//! use custody::core::{Identity, PrivateKey, Role};
//! use custody::store::MemoryStore;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let owner_key = PrivateKey::generate();
//! let reader_key = PrivateKey::generate();
//! let owner = Identity::new(owner_key.public_key(), Role::Patient);
//! let reader = Identity::new(reader_key.public_key(), Role::CareProvider);
//!
//! let store = MemoryStore::new();
//! store.register(owner.clone()).unwrap();
//! store.register(reader.clone()).unwrap();
//! let custodian = Custodian::new(store, CustodyConfig::default()).unwrap();
//!
//! let upload = custodian
//!     .upload(&owner, "lab", b"lab-result-42", Default::default())
//!     .await
//!     .unwrap();
//!
//! let AccessRequest::Requested(request) = custodian
//!     .request_access(&reader.identifier(), &owner.identifier(), &upload.record_ref)
//!     .await
//!     .unwrap()
//! else {
//!     unreachable!()
//! };
//! custodian.approve_access(&request.request_ref, &owner_key).await.unwrap();
//!
//! let readable = custodian.list_readable(&reader.identifier()).await.unwrap();
//! let plaintext = custodian.open(&readable[0], &reader_key).await.unwrap();
//! assert_eq!(plaintext, b"lab-result-42");
//! # }
//! ```
//!
//! ## Crate Structure
//!
//! - [`core`] - Identities, identifiers, record metadata
//! - [`perms`] - Envelope cipher, key wrapping, request state machine
//! - [`store`] - Collaborator traits and reference backends

pub mod config;
pub mod custodian;
pub mod error;

pub use config::{CustodyConfig, RetryPolicy};
pub use custodian::{meta_keys, Custodian, UploadReceipt};
pub use error::{CustodyError, Result};

// Re-export component crates
pub use custody_core as core;
pub use custody_perms as perms;
pub use custody_store as store;

// Re-export commonly used types
pub use custody_core::{
    ContentId, Identifier, Identity, PrivateKey, PublicKey, RecordMetadata, RecordRef,
    RequestRef, Role, WrappedKey,
};
pub use custody_perms::{AccessRequest, AuxMeta, PermissionRequest, RequestState};
pub use custody_store::{Backend, MemoryStore, Notification, SqliteStore};
