//! Envelope encryption of record payloads.
//!
//! A payload is sealed under a fresh content key and IV; the content key is
//! wrapped for the first reader. The resulting [`EncryptedBlob`] is what
//! the content store holds, and its stored form is deterministic JSON:
//!
//! ```text
//! {"ciphertext":"<base64>","iv":"<base64>","meta":{"filename":"...", ...}}
//! ```
//!
//! `meta` travels in the clear next to the ciphertext but is authenticated
//! as associated data, so editing it makes the blob fail to open.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use custody_core::{PrivateKey, PublicKey, WrappedKey};

use crate::crypto::{ContentKey, Iv, IV_LEN};
use crate::error::{PermsError, Result};
use crate::keyshare::{unwrap_key, wrap_key};

/// Default plaintext ceiling: 16 MiB.
pub const DEFAULT_MAX_PLAINTEXT_LEN: usize = 16 * 1024 * 1024;

/// Prefix of the associated data bound to every blob.
const AAD_PREFIX: &[u8] = b"custody-blob-v1";

/// Auxiliary, non-secret metadata stored with a blob.
pub type AuxMeta = BTreeMap<String, String>;

/// Envelope cipher limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Largest plaintext accepted by `encrypt`, in bytes.
    pub max_plaintext_len: usize,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            max_plaintext_len: DEFAULT_MAX_PLAINTEXT_LEN,
        }
    }
}

/// An encrypted payload as held by the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    /// AES-256-GCM output, tag included.
    #[serde(with = "custody_core::codec::base64_serde")]
    pub ciphertext: Vec<u8>,

    /// The IV used for this blob.
    #[serde(with = "iv_serde")]
    pub iv: Iv,

    /// Non-secret metadata, authenticated with the ciphertext.
    #[serde(default)]
    pub meta: AuxMeta,
}

impl EncryptedBlob {
    /// Serialize to the stored JSON form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| PermsError::Serialization(e.to_string()))
    }

    /// Parse the stored JSON form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| PermsError::Encoding(e.to_string()))
    }

    /// Size of the ciphertext.
    pub fn ciphertext_len(&self) -> usize {
        self.ciphertext.len()
    }
}

/// Associated data for a blob: a version tag followed by the canonical meta.
fn blob_aad(meta: &AuxMeta) -> Result<Vec<u8>> {
    let mut aad = AAD_PREFIX.to_vec();
    serde_json::to_writer(&mut aad, meta).map_err(|e| PermsError::Serialization(e.to_string()))?;
    Ok(aad)
}

/// Encrypts payloads and opens them for key holders.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeCipher {
    config: EnvelopeConfig,
}

impl EnvelopeCipher {
    /// Create a cipher with the given limits.
    pub fn new(config: EnvelopeConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }

    /// Encrypt `plaintext` for the holder of `recipient_public`.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        recipient_public: &PublicKey,
    ) -> Result<(EncryptedBlob, WrappedKey)> {
        self.encrypt_with_meta(plaintext, recipient_public, AuxMeta::new())
    }

    /// Encrypt `plaintext` and bind `meta` to the ciphertext.
    ///
    /// Oversized input fails before any key or IV is drawn.
    pub fn encrypt_with_meta(
        &self,
        plaintext: &[u8],
        recipient_public: &PublicKey,
        meta: AuxMeta,
    ) -> Result<(EncryptedBlob, WrappedKey)> {
        if plaintext.len() > self.config.max_plaintext_len {
            return Err(PermsError::Encoding(format!(
                "plaintext of {} bytes exceeds limit of {}",
                plaintext.len(),
                self.config.max_plaintext_len
            )));
        }

        let aad = blob_aad(&meta)?;
        let content_key = ContentKey::generate();
        let iv = Iv::generate();

        let ciphertext = content_key.seal(plaintext, &iv, &aad)?;
        let wrapped = wrap_key(&content_key, recipient_public)?;

        Ok((
            EncryptedBlob {
                ciphertext,
                iv,
                meta,
            },
            wrapped,
        ))
    }

    /// Decrypt a blob with a wrapped key addressed to `private_key`.
    ///
    /// Unwrap failures are [`PermsError::Unwrap`]; a blob whose ciphertext,
    /// IV or meta changed is [`PermsError::Integrity`].
    pub fn decrypt(
        &self,
        blob: &EncryptedBlob,
        wrapped: &WrappedKey,
        private_key: &PrivateKey,
    ) -> Result<Vec<u8>> {
        let content_key = unwrap_key(wrapped, private_key)?;
        let aad = blob_aad(&blob.meta)?;
        content_key.open(&blob.ciphertext, &blob.iv, &aad)
    }
}

/// Serde adapter: [`Iv`] as base64.
mod iv_serde {
    use serde::{Deserializer, Serializer};

    use super::{Iv, IV_LEN};

    pub fn serialize<S: Serializer>(iv: &Iv, s: S) -> Result<S::Ok, S::Error> {
        custody_core::codec::base64_serde::serialize(iv.as_bytes(), s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Iv, D::Error> {
        let bytes = custody_core::codec::base64_serde::deserialize(d)?;
        Iv::from_slice(&bytes).map_err(|_| {
            serde::de::Error::custom(format!("iv must be {} bytes, got {}", IV_LEN, bytes.len()))
        })
    }
}
