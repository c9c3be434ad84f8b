//! Signing credential custody.
//!
//! Signing secrets are stored encrypted at rest with AES-256-GCM. Every
//! encryption draws a fresh 96-bit nonce which is stored in front of the
//! ciphertext:
//!
//! ```text
//! v1:<base64(nonce || ciphertext || tag)>
//! ```

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{AppResult, CustodyError};

const FORMAT_PREFIX: &str = "v1:";
const NONCE_LEN: usize = 12;

/// A decrypted signing secret.
///
/// Lives only for the duration of one settlement call. It has no `Display`,
/// its `Debug` is redacted, and its bytes are zeroed on drop.
pub struct SigningSecret(Vec<u8>);

impl SigningSecret {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_hex(encoded: &str) -> AppResult<Self> {
        let bytes = hex::decode(encoded.trim().trim_start_matches("0x"))
            .map_err(|e| CustodyError::InvalidSecret(format!("not hex: {}", e)))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret(<redacted>)")
    }
}

impl Drop for SigningSecret {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

/// Encrypts and decrypts signing secrets at rest
#[async_trait]
pub trait KeyCustody: Send + Sync {
    /// Used once, when a plan is created
    async fn encrypt(&self, secret: &SigningSecret) -> AppResult<String>;

    async fn decrypt(&self, encrypted: &str) -> AppResult<SigningSecret>;
}

/// AES-256-GCM custody keyed from a configured master secret
pub struct AesKeyCustody {
    cipher: Aes256Gcm,
}

impl AesKeyCustody {
    pub fn new(master_secret: &str) -> AppResult<Self> {
        if master_secret.trim().is_empty() {
            return Err(CustodyError::InvalidSecret("master secret is empty".to_string()).into());
        }
        let key = Self::derive_key(master_secret);
        Ok(Self {
            cipher: Aes256Gcm::new(&key),
        })
    }

    fn derive_key(master_secret: &str) -> Key<Aes256Gcm> {
        let mut hasher = Sha256::new();
        hasher.update(master_secret.as_bytes());
        let digest = hasher.finalize();
        *Key::<Aes256Gcm>::from_slice(&digest)
    }
}

#[async_trait]
impl KeyCustody for AesKeyCustody {
    async fn encrypt(&self, secret: &SigningSecret) -> AppResult<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, secret.as_bytes())
            .map_err(|e| CustodyError::EncryptionFailed(e.to_string()))?;

        let mut payload = nonce.to_vec();
        payload.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", FORMAT_PREFIX, BASE64.encode(payload)))
    }

    async fn decrypt(&self, encrypted: &str) -> AppResult<SigningSecret> {
        let encoded = encrypted
            .strip_prefix(FORMAT_PREFIX)
            .ok_or_else(|| CustodyError::Malformed("missing format prefix".to_string()))?;

        let payload = BASE64
            .decode(encoded)
            .map_err(|_| CustodyError::Malformed("invalid base64 encoding".to_string()))?;

        if payload.len() <= NONCE_LEN {
            return Err(CustodyError::Malformed("payload too short".to_string()).into());
        }

        let (nonce_bytes, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CustodyError::DecryptionFailed)?;

        Ok(SigningSecret::from_bytes(plaintext))
    }
}
