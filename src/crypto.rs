//! At-rest encryption for SNMP credentials
//!
//! Credentials are sealed with AES-256-GCM under a key derived from the
//! operator-supplied passphrase. The sealed form is `base64(nonce || ct)`;
//! plaintext exists only inside the prober's call frames.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of the AES-GCM nonce prefix in the sealed form
const NONCE_LEN: usize = 12;

/// Credential encryption errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Sealed credential is not valid base64")]
    Encoding(#[from] base64::DecodeError),

    #[error("Sealed credential is truncated ({len} bytes)")]
    Truncated { len: usize },

    #[error("Credential decryption failed (wrong key or corrupt ciphertext)")]
    Decrypt,

    #[error("Credential encryption failed")]
    Encrypt,

    #[error("Decrypted credential is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Symmetric cipher for sealing credentials at rest
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher {
    /// Derives the AES-256 key from an operator passphrase
    #[must_use]
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Seals a plaintext credential for storage
    ///
    /// # Errors
    ///
    /// Returns an error when encryption fails.
    pub fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(sealed))
    }

    /// Opens a sealed credential
    ///
    /// # Errors
    ///
    /// Returns an error when the input is malformed or the key is wrong.
    pub fn open(&self, sealed: &str) -> Result<String, CryptoError> {
        let raw = BASE64.decode(sealed.trim())?;
        if raw.len() <= NONCE_LEN {
            return Err(CryptoError::Truncated { len: raw.len() });
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;
        Ok(String::from_utf8(plaintext)?)
    }
}
