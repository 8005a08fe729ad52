//! AES-256-GCM sealing for credential columns.
//!
//! A sealed value is `base64(nonce || ciphertext)`, with a fresh 96-bit
//! nonce per write. The key is 32 bytes, base64-encoded, read from
//! [`CREDENTIAL_KEY_ENV`].

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, KeyInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;
use zeroize::Zeroizing;

/// Environment variable holding the base64 credential key.
pub const CREDENTIAL_KEY_ENV: &str = "RELIST_CREDENTIAL_KEY";

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("{CREDENTIAL_KEY_ENV} is not set")]
    MissingKey,

    #[error("credential key must be {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("base64 decode failed: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed; wrong key or corrupted value")]
    DecryptionFailed,
}

/// Seals and opens credential values with one AES-256-GCM key.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher {
    /// # Errors
    /// Returns [`CipherError::InvalidKeyLength`] unless `key` is 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        if key.len() != KEY_LEN {
            return Err(CipherError::InvalidKeyLength(key.len()));
        }
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength(key.len()))?;
        Ok(Self { cipher })
    }

    /// # Errors
    /// Returns an error if `encoded` is not base64 for a 32-byte key.
    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let key = Zeroizing::new(BASE64.decode(encoded.trim())?);
        Self::new(&key)
    }

    /// Loads the key from [`CREDENTIAL_KEY_ENV`].
    ///
    /// # Errors
    /// Returns [`CipherError::MissingKey`] if the variable is unset or
    /// empty, or a decode error if it is malformed.
    pub fn from_env() -> Result<Self, CipherError> {
        let encoded = Zeroizing::new(std::env::var(CREDENTIAL_KEY_ENV).unwrap_or_default());
        if encoded.trim().is_empty() {
            return Err(CipherError::MissingKey);
        }
        Self::from_base64(&encoded)
    }

    /// A fresh random key, base64-encoded, suitable for [`CREDENTIAL_KEY_ENV`].
    #[must_use]
    pub fn generate_key() -> String {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        BASE64.encode(key.as_slice())
    }

    /// # Errors
    /// Returns [`CipherError::EncryptionFailed`] if AES-GCM rejects the input.
    #[allow(deprecated)]
    pub fn seal(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::EncryptionFailed)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    /// # Errors
    /// Returns [`CipherError::DecryptionFailed`] if the value was sealed
    /// under another key or has been altered.
    #[allow(deprecated)]
    pub fn open(&self, sealed: &str) -> Result<String, CipherError> {
        let raw = BASE64.decode(sealed)?;
        if raw.len() <= NONCE_LEN {
            return Err(CipherError::DecryptionFailed);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| CipherError::DecryptionFailed)?,
        );
        String::from_utf8(plaintext.to_vec()).map_err(|_| CipherError::DecryptionFailed)
    }
}
