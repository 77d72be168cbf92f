//! Wrapping content keys for individual readers.
//!
//! A wrapped key is `ephemeral_public(32) || nonce(12) || sealed_key(48)`:
//! the content key sealed under a key derived from a fresh X25519 agreement
//! with the reader's public key. Every wrap draws a new ephemeral key and
//! nonce, so wrapping the same content key twice gives different bytes.

use zeroize::Zeroizing;

use custody_core::{Identifier, PrivateKey, PublicKey, WrappedKey};

use crate::crypto::{
    derive_wrap_key, wrap_nonce, wrap_open, wrap_seal, ContentKey, EphemeralKeyPair, TAG_LEN,
    WRAP_NONCE_LEN,
};
use crate::error::{PermsError, Result};

/// Length of wrapped key bytes.
pub const WRAPPED_KEY_LEN: usize = 32 + WRAP_NONCE_LEN + 32 + TAG_LEN;

/// Wrap a content key for the holder of `recipient_public`.
pub fn wrap_key(content_key: &ContentKey, recipient_public: &PublicKey) -> Result<WrappedKey> {
    let ephemeral = EphemeralKeyPair::generate();
    let ephemeral_public = ephemeral.public_key();
    let shared = ephemeral.diffie_hellman(recipient_public);
    let wrap_key = derive_wrap_key(&shared, &ephemeral_public, recipient_public);

    let nonce = wrap_nonce();
    let sealed = wrap_seal(&wrap_key, &nonce, content_key.as_bytes())?;

    let mut wrapped_bytes = Vec::with_capacity(WRAPPED_KEY_LEN);
    wrapped_bytes.extend_from_slice(ephemeral_public.as_bytes());
    wrapped_bytes.extend_from_slice(&nonce);
    wrapped_bytes.extend_from_slice(&sealed);

    Ok(WrappedKey::new(
        Identifier::derive(recipient_public),
        wrapped_bytes,
    ))
}

/// Recover the content key from a wrapped key.
///
/// Fails with [`PermsError::Unwrap`] if the key is addressed to another
/// identifier, the bytes are malformed, or `private_key` does not match.
pub fn unwrap_key(wrapped: &WrappedKey, private_key: &PrivateKey) -> Result<ContentKey> {
    let own_public = private_key.public_key();
    if wrapped.recipient != Identifier::derive(&own_public) {
        return Err(PermsError::Unwrap(format!(
            "wrapped key is addressed to {}",
            wrapped.recipient
        )));
    }

    let bytes = &wrapped.wrapped_bytes;
    if bytes.len() != WRAPPED_KEY_LEN {
        return Err(PermsError::Unwrap(format!(
            "wrapped key must be {} bytes, got {}",
            WRAPPED_KEY_LEN,
            bytes.len()
        )));
    }

    let (eph, rest) = bytes.split_at(32);
    let (nonce, sealed) = rest.split_at(WRAP_NONCE_LEN);

    let mut eph_arr = [0u8; 32];
    eph_arr.copy_from_slice(eph);
    let ephemeral_public = PublicKey::from_bytes(eph_arr);

    let mut nonce_arr = [0u8; WRAP_NONCE_LEN];
    nonce_arr.copy_from_slice(nonce);

    let shared = private_key.diffie_hellman(&ephemeral_public);
    let wrap_key = derive_wrap_key(&shared, &ephemeral_public, &own_public);
    let key_bytes = wrap_open(&wrap_key, &nonce_arr, sealed)?;

    let mut arr = Zeroizing::new([0u8; 32]);
    if key_bytes.len() != arr.len() {
        return Err(PermsError::Unwrap(format!(
            "invalid key length: expected 32, got {}",
            key_bytes.len()
        )));
    }
    arr.copy_from_slice(&key_bytes);
    Ok(ContentKey::from_bytes(*arr))
}

/// Re-wrap a content key for a new reader without touching the payload.
///
/// The owner's private key opens `wrapped`; the recovered key is wrapped again
/// for `new_recipient` and dropped (zeroized) before returning.
pub fn rewrap_key(
    wrapped: &WrappedKey,
    owner_private: &PrivateKey,
    new_recipient: &PublicKey,
) -> Result<WrappedKey> {
    let content_key = unwrap_key(wrapped, owner_private)?;
    wrap_key(&content_key, new_recipient)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let recipient = PrivateKey::generate();
        let content_key = ContentKey::generate();

        let wrapped = wrap_key(&content_key, &recipient.public_key()).unwrap();
        assert_eq!(wrapped.wrapped_bytes.len(), WRAPPED_KEY_LEN);
        assert_eq!(wrapped.recipient, Identifier::derive(&recipient.public_key()));

        let recovered = unwrap_key(&wrapped, &recipient).unwrap();
        assert_eq!(content_key.as_bytes(), recovered.as_bytes());
    }

    #[test]
    fn test_wrap_is_randomized() {
        let recipient = PrivateKey::generate().public_key();
        let content_key = ContentKey::generate();

        let a = wrap_key(&content_key, &recipient).unwrap();
        let b = wrap_key(&content_key, &recipient).unwrap();
        assert_ne!(a.wrapped_bytes, b.wrapped_bytes);
    }

    #[test]
    fn test_unwrap_wrong_recipient_fails() {
        let recipient = PrivateKey::generate();
        let wrong = PrivateKey::generate();
        let wrapped = wrap_key(&ContentKey::generate(), &recipient.public_key()).unwrap();

        assert!(matches!(unwrap_key(&wrapped, &wrong), Err(PermsError::Unwrap(_))));
    }

    #[test]
    fn test_unwrap_readdressed_key_fails() {
        // Claiming the key belongs to another identifier does not help the
        // other identifier open it.
        let recipient = PrivateKey::generate();
        let thief = PrivateKey::generate();
        let mut wrapped = wrap_key(&ContentKey::generate(), &recipient.public_key()).unwrap();
        wrapped.recipient = Identifier::derive(&thief.public_key());

        assert!(matches!(unwrap_key(&wrapped, &thief), Err(PermsError::Unwrap(_))));
    }

    #[test]
    fn test_unwrap_truncated_fails() {
        let recipient = PrivateKey::generate();
        let mut wrapped = wrap_key(&ContentKey::generate(), &recipient.public_key()).unwrap();
        wrapped.wrapped_bytes.truncate(40);

        assert!(matches!(unwrap_key(&wrapped, &recipient), Err(PermsError::Unwrap(_))));
    }

    #[test]
    fn test_rewrap_preserves_key() {
        let owner = PrivateKey::generate();
        let reader = PrivateKey::generate();
        let content_key = ContentKey::generate();

        let owner_wrapped = wrap_key(&content_key, &owner.public_key()).unwrap();
        let reader_wrapped = rewrap_key(&owner_wrapped, &owner, &reader.public_key()).unwrap();

        assert_eq!(reader_wrapped.recipient, Identifier::derive(&reader.public_key()));
        let recovered = unwrap_key(&reader_wrapped, &reader).unwrap();
        assert_eq!(content_key.as_bytes(), recovered.as_bytes());
    }

    #[test]
    fn test_rewrap_with_wrong_owner_fails() {
        let owner = PrivateKey::generate();
        let impostor = PrivateKey::generate();
        let reader = PrivateKey::generate();

        let owner_wrapped = wrap_key(&ContentKey::generate(), &owner.public_key()).unwrap();
        let result = rewrap_key(&owner_wrapped, &impostor, &reader.public_key());

        assert!(matches!(result, Err(PermsError::Unwrap(_))));
    }
}
