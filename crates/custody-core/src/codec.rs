//! Boundary text encodings.
//!
//! Identifiers and references cross external boundaries as lowercase hex;
//! ciphertext, IVs and wrapped keys cross as standard base64. Everything
//! inside the workspace is raw bytes, and conversion happens only here,
//! mostly through the `#[serde(with = ...)]` adapters below.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{CoreError, Result};

/// Encode bytes as standard base64.
pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard base64.
pub fn from_base64(s: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(s.trim())
        .map_err(|e| CoreError::DecodingError(format!("base64: {}", e)))
}

/// Decode a 32-byte value from hex, accepting an optional `0x` prefix.
///
/// Ledger tooling commonly prints bytes32 values with the prefix.
pub fn hex32(s: &str) -> Result<[u8; 32]> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).map_err(|e| CoreError::DecodingError(format!("hex: {}", e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        CoreError::DecodingError(format!("expected 32 bytes, got {}", b.len()))
    })
}

/// Serde adapter: `[u8; 32]` as lowercase hex.
pub mod hex32_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(d)?;
        super::hex32(&text).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter: `Vec<u8>` as standard base64.
pub mod base64_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::to_base64(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        super::from_base64(&text).map_err(serde::de::Error::custom)
    }
}
