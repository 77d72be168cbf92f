//! # Custody Permissions
//!
//! Envelope encryption and the permission request protocol.
//!
//! ## Encryption Model
//!
//! Records use a two-layer key model:
//!
//! 1. **Content Key**: a fresh AES-256-GCM key seals the payload under a
//!    128-bit IV, with the blob's metadata as associated data
//! 2. **Wrapped Keys**: the content key is sealed to each reader through an
//!    ephemeral X25519 agreement and ChaCha20-Poly1305
//!
//! This allows:
//! - Adding readers without re-encrypting content ([`rewrap_key`])
//! - Revocation by simply not wrapping for a reader again
//!
//! ## Permission Requests
//!
//! [`PermissionRequest`] moves `Requested → Approved | Denied`. Approval
//! carries the key wrapped for the requester; terminal states absorb
//! repeated transitions.
//!
//! ## Usage
//!
//! ```rust
//! use custody_core::PrivateKey;
//! use custody_perms::{rewrap_key, EnvelopeCipher};
//!
//! let owner = PrivateKey::generate();
//! let reader = PrivateKey::generate();
//! let cipher = EnvelopeCipher::default();
//!
//! let (blob, owner_key) = cipher.encrypt(b"lab-result-42", &owner.public_key()).unwrap();
//! let reader_key = rewrap_key(&owner_key, &owner, &reader.public_key()).unwrap();
//!
//! assert_eq!(cipher.decrypt(&blob, &reader_key, &reader).unwrap(), b"lab-result-42");
//! ```

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod keyshare;
pub mod request;

pub use crypto::{ContentKey, EphemeralKeyPair, Iv, IV_LEN};
pub use envelope::{
    AuxMeta, EncryptedBlob, EnvelopeCipher, EnvelopeConfig, DEFAULT_MAX_PLAINTEXT_LEN,
};
pub use error::{PermsError, Result};
pub use keyshare::{rewrap_key, unwrap_key, wrap_key, WRAPPED_KEY_LEN};
pub use request::{
    derive_request_ref, AccessRequest, PermissionRequest, RequestState, Transition,
};
