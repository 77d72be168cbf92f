//! Symmetric primitives for the envelope cipher.
//!
//! Payloads are sealed with AES-256-GCM under a 128-bit IV. Content keys are
//! wrapped for a recipient with an ephemeral X25519 agreement, a BLAKE3 key
//! derivation and ChaCha20-Poly1305.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;
use std::fmt;
use x25519_dalek::EphemeralSecret;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use custody_core::PublicKey;

use crate::error::{PermsError, Result};

/// AES-256-GCM with a 16-byte IV and a 16-byte tag.
type Aes256Gcm128 = AesGcm<Aes256, U16>;

/// Key derivation context for key-wrapping keys.
const WRAP_CONTEXT: &str = "custody 2024 content key wrap v1";

/// IV length in bytes.
pub const IV_LEN: usize = 16;

/// Wrap nonce length in bytes.
pub const WRAP_NONCE_LEN: usize = 12;

/// AEAD tag length in bytes, for both ciphers.
pub const TAG_LEN: usize = 16;

/// A 256-bit content key.
///
/// Generated per upload, zeroized on drop, never serialized. It leaves this
/// crate only wrapped for a recipient.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut key = Self([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut key.0);
        key
    }

    /// Create from raw bytes.
    ///
    /// `[u8; 32]` is `Copy`: only this function's copy is cleared, the
    /// caller must clear its own.
    pub fn from_bytes(mut bytes: [u8; 32]) -> Self {
        let key = Self(bytes);
        bytes.zeroize();
        key
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Seal `plaintext` under this key, binding `aad`.
    pub fn seal(&self, plaintext: &[u8], iv: &Iv, aad: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm128::new_from_slice(&self.0)
            .map_err(|e| PermsError::Encoding(e.to_string()))?;

        cipher
            .encrypt(
                iv.0.as_slice().into(),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| PermsError::Encoding("payload encryption failed".into()))
    }

    /// Open `ciphertext` sealed under this key.
    ///
    /// Any authentication failure is an integrity error.
    pub fn open(&self, ciphertext: &[u8], iv: &Iv, aad: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm128::new_from_slice(&self.0)
            .map_err(|e| PermsError::Encoding(e.to_string()))?;

        cipher
            .decrypt(
                iv.0.as_slice().into(),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| PermsError::Integrity("payload authentication failed".into()))
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey(<redacted>)")
    }
}

/// A 128-bit IV, fresh per encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iv(pub [u8; IV_LEN]);

impl Iv {
    /// Generate a new random IV.
    pub fn generate() -> Self {
        let mut bytes = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; IV_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse from a slice, rejecting the wrong length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; IV_LEN] = bytes.try_into().map_err(|_| {
            PermsError::Encoding(format!("iv must be {} bytes, got {}", IV_LEN, bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; IV_LEN] {
        &self.0
    }
}

/// Derive the key-wrapping key for one agreement.
///
/// Binds the shared secret to both public keys so a sealed key cannot be
/// replayed under a different ephemeral or recipient.
pub(crate) fn derive_wrap_key(
    shared: &[u8; 32],
    ephemeral_public: &PublicKey,
    recipient_public: &PublicKey,
) -> Zeroizing<[u8; 32]> {
    let mut hasher = blake3::Hasher::new_derive_key(WRAP_CONTEXT);
    hasher.update(shared);
    hasher.update(ephemeral_public.as_bytes());
    hasher.update(recipient_public.as_bytes());
    Zeroizing::new(*hasher.finalize().as_bytes())
}

/// Seal a short secret with ChaCha20-Poly1305.
pub(crate) fn wrap_seal(
    wrap_key: &[u8; 32],
    nonce: &[u8; WRAP_NONCE_LEN],
    secret: &[u8],
) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new_from_slice(wrap_key)
        .map_err(|e| PermsError::Encoding(e.to_string()))?;
    chacha20poly1305::aead::Aead::encrypt(&cipher, nonce.as_slice().into(), secret)
        .map_err(|_| PermsError::Encoding("key wrap failed".into()))
}

/// Open a secret sealed by [`wrap_seal`].
pub(crate) fn wrap_open(
    wrap_key: &[u8; 32],
    nonce: &[u8; WRAP_NONCE_LEN],
    sealed: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = ChaCha20Poly1305::new_from_slice(wrap_key)
        .map_err(|e| PermsError::Unwrap(e.to_string()))?;
    chacha20poly1305::aead::Aead::decrypt(&cipher, nonce.as_slice().into(), sealed)
        .map(Zeroizing::new)
        .map_err(|_| PermsError::Unwrap("wrapped key authentication failed".into()))
}

/// Random nonce for a key wrap.
pub(crate) fn wrap_nonce() -> [u8; WRAP_NONCE_LEN] {
    let mut bytes = [0u8; WRAP_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Ephemeral key pair for one-time key agreement.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    /// Generate a new ephemeral key pair.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let public = PublicKey::from(x25519_dalek::PublicKey::from(&secret));
        Self { secret, public }
    }

    /// Get the public key.
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Perform key agreement with a peer's public key.
    ///
    /// Consumes the ephemeral secret (can only be used once).
    pub fn diffie_hellman(self, peer_public: &PublicKey) -> Zeroizing<[u8; 32]> {
        let shared = self.secret.diffie_hellman(&peer_public.to_dalek());
        Zeroizing::new(*shared.as_bytes())
    }
}
