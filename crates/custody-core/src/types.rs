//! Strong type definitions for Custody.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{ContentHash, PublicKey};
use crate::error::Result;

/// Domain separation context for identity derivation.
pub const IDENTITY_CONTEXT: &str = "custody 2024 identity v1";

/// Defines a 32-byte hash-valued identifier newtype.
macro_rules! hash_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(#[serde(with = "crate::codec::hex32_serde")] pub [u8; 32]);

        impl $name {
            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Convert to hex string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex string (an `0x` prefix is accepted).
            pub fn from_hex(s: &str) -> Result<Self> {
                crate::codec::hex32(s).map(Self)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), &self.to_hex()[..16])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", &self.to_hex()[..16])
            }
        }

        impl From<ContentHash> for $name {
            fn from(hash: ContentHash) -> Self {
                Self(hash.0)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

hash_id!(
    /// Identity identifier: domain-separated BLAKE3 of the raw public key.
    ///
    /// Two identities with the same public key share an identifier.
    Identifier,
    "Identifier"
);

hash_id!(
    /// Reference to a published record: hash of its canonical encoding.
    RecordRef,
    "RecordRef"
);

hash_id!(
    /// Reference to a permission request, assigned by the permission ledger.
    RequestRef,
    "RequestRef"
);

impl Identifier {
    /// Derive the identifier for a public key.
    pub fn derive(public_key: &PublicKey) -> Self {
        ContentHash::derive(IDENTITY_CONTEXT, public_key.as_bytes()).into()
    }
}

/// Content identifier assigned by the content store.
///
/// Opaque to the core: it is compared and passed back to the store, never
/// parsed. Any addressing scheme (CIDv0, CIDv1, a hex digest) fits.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
    /// Wrap a store-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.0)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
