//! Canonical CBOR encoding of record metadata.
//!
//! Follows RFC 8949 Core Deterministic Encoding:
//! - Map keys are small integers, written in ascending order
//! - Integers and lengths use the smallest valid encoding
//! - Definite lengths only
//!
//! Record references are hashed over these bytes, so two parties encoding
//! the same metadata always agree on the reference.

use ciborium::value::Value;

use crate::error::{CoreError, Result};
use crate::record::{RecordMetadata, WrappedKey};
use crate::types::{ContentId, Identifier};

/// Encoding version written under key 0.
pub const RECORD_ENCODING_VERSION: u64 = 1;

/// Record field keys. Keys 0-23 encode as single bytes.
mod keys {
    pub const VERSION: u64 = 0;
    pub const OWNER: u64 = 1;
    pub const DATA_TYPE: u64 = 2;
    pub const CONTENT_ID: u64 = 3;
    pub const RECIPIENT: u64 = 4;
    pub const WRAPPED_KEY: u64 = 5;
}

/// Encode record metadata to canonical CBOR bytes.
pub fn canonical_record_bytes(record: &RecordMetadata) -> Vec<u8> {
    let mut buf = Vec::with_capacity(96 + record.wrapped_key.wrapped_bytes.len());

    // Six entries, keys already ascending.
    encode_uint(&mut buf, 5, 6);

    encode_uint(&mut buf, 0, keys::VERSION);
    encode_uint(&mut buf, 0, RECORD_ENCODING_VERSION);

    encode_uint(&mut buf, 0, keys::OWNER);
    encode_bytes(&mut buf, record.owner.as_bytes());

    encode_uint(&mut buf, 0, keys::DATA_TYPE);
    encode_text(&mut buf, &record.data_type);

    encode_uint(&mut buf, 0, keys::CONTENT_ID);
    encode_text(&mut buf, record.content_id.as_str());

    encode_uint(&mut buf, 0, keys::RECIPIENT);
    encode_bytes(&mut buf, record.wrapped_key.recipient.as_bytes());

    encode_uint(&mut buf, 0, keys::WRAPPED_KEY);
    encode_bytes(&mut buf, &record.wrapped_key.wrapped_bytes);

    buf
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Byte string (major type 2).
fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Text string (major type 3).
fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Decode record metadata from canonical bytes.
///
/// Rejects input that decodes but is not in canonical form, so a stored
/// record always re-hashes to the reference it was stored under.
pub fn decode_record(bytes: &[u8]) -> Result<RecordMetadata> {
    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?;

    let map = match value {
        Value::Map(m) => m,
        _ => return Err(CoreError::DecodingError("expected map".into())),
    };

    let get = |key: u64| -> Option<&Value> {
        map.iter()
            .find(|(k, _)| matches!(k, Value::Integer(i) if i128::from(*i) == key as i128))
            .map(|(_, v)| v)
    };

    match get(keys::VERSION) {
        Some(Value::Integer(i)) if i128::from(*i) == RECORD_ENCODING_VERSION as i128 => {}
        _ => return Err(CoreError::DecodingError("unsupported record version".into())),
    }

    let owner = Identifier::from_bytes(bytes32(get(keys::OWNER), "owner")?);
    let data_type = text(get(keys::DATA_TYPE), "data_type")?;
    let content_id = ContentId::new(text(get(keys::CONTENT_ID), "content_id")?);
    let recipient = Identifier::from_bytes(bytes32(get(keys::RECIPIENT), "recipient")?);
    let wrapped_bytes = match get(keys::WRAPPED_KEY) {
        Some(Value::Bytes(b)) => b.clone(),
        _ => return Err(CoreError::DecodingError("invalid wrapped_key".into())),
    };

    let record = RecordMetadata::new(
        owner,
        data_type,
        content_id,
        WrappedKey::new(recipient, wrapped_bytes),
    )?;

    if canonical_record_bytes(&record) != bytes {
        return Err(CoreError::DecodingError("non-canonical record encoding".into()));
    }

    Ok(record)
}

fn bytes32(value: Option<&Value>, field: &str) -> Result<[u8; 32]> {
    match value {
        Some(Value::Bytes(b)) if b.len() == 32 => {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(b);
            Ok(arr)
        }
        _ => Err(CoreError::DecodingError(format!("invalid {}", field))),
    }
}

fn text(value: Option<&Value>, field: &str) -> Result<String> {
    match value {
        Some(Value::Text(s)) => Ok(s.clone()),
        _ => Err(CoreError::DecodingError(format!("invalid {}", field))),
    }
}
