//! AES-256-GCM encryption for secrets at rest.
//!
//! - [`EncryptionService`]: encrypt/decrypt with a process-wide 32-byte key
//! - [`EncryptedData`]: ciphertext plus the nonce it was sealed with
//!
//! Every call to [`EncryptionService::encrypt`] draws a fresh 96-bit nonce
//! from the OS RNG, so sealing the same plaintext twice never yields the same
//! ciphertext.
//!
//! ## Usage
//!
//! ```rust
//! use calsync_common::crypto::encryption::EncryptionService;
//!
//! let key = EncryptionService::generate_key();
//! let service = EncryptionService::new(key)?;
//!
//! let encrypted = service.encrypt(b"ya29.access-token")?;
//! let decrypted = service.decrypt(&encrypted)?;
//! assert_eq!(decrypted, b"ya29.access-token");
//! # Ok::<(), calsync_common::error::CommonError>(())
//! ```

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

/// Required key length in bytes.
pub const KEY_LEN: usize = 32;
/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// Ciphertext sealed together with the nonce used to produce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Encode as a `(ciphertext, nonce)` pair of base64 strings for storage.
    pub fn to_base64(&self) -> (String, String) {
        (BASE64.encode(&self.ciphertext), BASE64.encode(&self.nonce))
    }

    /// Decode a stored `(ciphertext, nonce)` pair.
    ///
    /// # Errors
    /// Returns `CommonError::Decrypt` when either part is not valid base64.
    pub fn from_base64(ciphertext: &str, nonce: &str) -> CommonResult<Self> {
        let ciphertext = BASE64
            .decode(ciphertext)
            .map_err(|e| CommonError::decrypt(format!("ciphertext is not valid base64: {e}")))?;
        let nonce = BASE64
            .decode(nonce)
            .map_err(|e| CommonError::decrypt(format!("nonce is not valid base64: {e}")))?;
        Ok(Self { nonce, ciphertext })
    }
}

/// AES-256-GCM encryption service.
pub struct EncryptionService {
    key: Vec<u8>,
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService")
            .field("key", &"[REDACTED]")
            .field("fingerprint", &self.key_fingerprint())
            .finish()
    }
}

impl EncryptionService {
    /// Create a new encryption service from a raw 32-byte key.
    ///
    /// # Errors
    /// Returns `CommonError::Config` when the key has the wrong length.
    pub fn new(key: Vec<u8>) -> CommonResult<Self> {
        if key.len() != KEY_LEN {
            return Err(CommonError::config_field(
                "encryption.key",
                format!("key must be exactly {KEY_LEN} bytes, got {}", key.len()),
            ));
        }

        let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| {
            CommonError::config_field("encryption.key", format!("failed to create cipher: {e}"))
        })?;

        Ok(Self { key, cipher })
    }

    /// Create a service from a textual key, base64 or hex encoded.
    ///
    /// # Errors
    /// Returns `CommonError::Config` when the text decodes to anything other
    /// than 32 bytes.
    pub fn from_encoded_key(encoded: &str) -> CommonResult<Self> {
        let trimmed = encoded.trim();
        if trimmed.is_empty() {
            return Err(CommonError::config_field("encryption.key", "key is empty"));
        }

        let decoded = match hex::decode(trimmed) {
            Ok(bytes) if bytes.len() == KEY_LEN => bytes,
            _ => BASE64.decode(trimmed).map_err(|e| {
                let message = format!("key is not base64 or hex: {e}");
                CommonError::config_field("encryption.key", message)
            })?,
        };

        Self::new(decoded)
    }

    /// Generate a random 32-byte symmetric key.
    pub fn generate_key() -> Vec<u8> {
        let mut key = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Encrypt bytes into an [`EncryptedData`] payload.
    ///
    /// # Errors
    /// Returns `CommonError::Encrypt` if the cipher rejects the input.
    pub fn encrypt(&self, data: &[u8]) -> CommonResult<EncryptedData> {
        let nonce_bytes = Self::generate_nonce();
        let ciphertext = self
            .cipher
            .encrypt(&Nonce::from(nonce_bytes), data)
            .map_err(|e| CommonError::encrypt(format!("AES-256-GCM seal failed: {e}")))?;

        Ok(EncryptedData { nonce: nonce_bytes.to_vec(), ciphertext })
    }

    /// Decrypt an [`EncryptedData`] payload back into raw bytes.
    ///
    /// # Errors
    /// Returns `CommonError::Decrypt` on a malformed nonce or when the
    /// authentication tag does not verify (tampered ciphertext, wrong key).
    pub fn decrypt(&self, encrypted: &EncryptedData) -> CommonResult<Vec<u8>> {
        let nonce_array: [u8; NONCE_LEN] = encrypted.nonce.as_slice().try_into().map_err(|_| {
            CommonError::decrypt(format!(
                "nonce must be exactly {NONCE_LEN} bytes, got {}",
                encrypted.nonce.len()
            ))
        })?;

        self.cipher
            .decrypt(&Nonce::from(nonce_array), encrypted.ciphertext.as_ref())
            .map_err(|_| CommonError::decrypt("authentication tag mismatch"))
    }

    /// Generate a short fingerprint for the current key.
    pub fn key_fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(&self.key);
        let result = hasher.finalize();
        BASE64.encode(&result[..8])
    }

    fn generate_nonce() -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        nonce
    }
}
