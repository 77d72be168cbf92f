//! Participant identities.
//!
//! An identity is a public key, the identifier derived from it and a
//! descriptive role. Identities are immutable: the fields are private and the
//! only constructors derive or check the identifier.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::crypto::PublicKey;
use crate::error::{CoreError, Result};
use crate::types::Identifier;

/// Role a participant registered with.
///
/// Roles describe participants; the permission protocol does not branch on
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Patient,
    CareProvider,
    Researcher,
    Regulator,
}

impl Role {
    /// Stable textual name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "Patient",
            Role::CareProvider => "CareProvider",
            Role::Researcher => "Researcher",
            Role::Regulator => "Regulator",
        }
    }

    /// Ledger enum ordinal.
    pub const fn to_u8(&self) -> u8 {
        match self {
            Role::Patient => 0,
            Role::CareProvider => 1,
            Role::Researcher => 2,
            Role::Regulator => 3,
        }
    }

    /// Parse a ledger enum ordinal.
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Role::Patient),
            1 => Some(Role::CareProvider),
            2 => Some(Role::Researcher),
            3 => Some(Role::Regulator),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Patient" => Ok(Role::Patient),
            "CareProvider" => Ok(Role::CareProvider),
            "Researcher" => Ok(Role::Researcher),
            "Regulator" => Ok(Role::Regulator),
            other => Err(CoreError::UnknownRole(other.to_string())),
        }
    }
}

/// A registered participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IdentityParts", into = "IdentityParts")]
pub struct Identity {
    identifier: Identifier,
    public_key: PublicKey,
    role: Role,
}

impl Identity {
    /// Create an identity, deriving its identifier from the public key.
    pub fn new(public_key: PublicKey, role: Role) -> Self {
        Self {
            identifier: Identifier::derive(&public_key),
            public_key,
            role,
        }
    }

    /// Rebuild an identity from stored parts, checking the identifier.
    pub fn from_parts(identifier: Identifier, public_key: PublicKey, role: Role) -> Result<Self> {
        let derived = Identifier::derive(&public_key);
        if derived != identifier {
            return Err(CoreError::IdentifierMismatch {
                expected: identifier.to_hex(),
                derived: derived.to_hex(),
            });
        }
        Ok(Self {
            identifier,
            public_key,
            role,
        })
    }

    pub fn identifier(&self) -> Identifier {
        self.identifier
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn role(&self) -> Role {
        self.role
    }
}

/// Serialized form of [`Identity`]; deserialization re-checks the identifier.
#[derive(Serialize, Deserialize)]
struct IdentityParts {
    identifier: Identifier,
    public_key: PublicKey,
    role: Role,
}

impl TryFrom<IdentityParts> for Identity {
    type Error = CoreError;

    fn try_from(parts: IdentityParts) -> Result<Self> {
        Identity::from_parts(parts.identifier, parts.public_key, parts.role)
    }
}

impl From<Identity> for IdentityParts {
    fn from(identity: Identity) -> Self {
        Self {
            identifier: identity.identifier,
            public_key: identity.public_key,
            role: identity.role,
        }
    }
}
