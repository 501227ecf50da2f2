//! Account-level encryption for records that cross the network
//!
//! Uses AES-256-GCM with a key derived from:
//! - The account passphrase
//! - The account id (as a per-account salt)
//! - Application-specific salt
//!
//! Every device on the account derives the same key, so ciphertext produced on
//! one device decrypts on the others. Records at rest on the device stay in
//! plaintext; only the network boundary uses this.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::{Argon2, ParamsBuilder};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

/// Application-specific salt for key derivation
const APP_SALT: &[u8] = b"sync-core.v1.account.encryption.salt";

/// Nonce size for AES-GCM (96 bits / 12 bytes)
const NONCE_SIZE: usize = 12;

/// Encryption errors
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("Failed to derive encryption key: {0}")]
    KeyDerivation(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Invalid encrypted data format: {0}")]
    InvalidFormat(String),
}

impl From<EncryptionError> for crate::error::SyncError {
    fn from(e: EncryptionError) -> Self {
        crate::error::SyncError::DecryptionFailure(e.to_string())
    }
}

/// Argon2 cost parameters
#[derive(Debug, Clone, Copy)]
pub struct KeyParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KeyParams {
    fn default() -> Self {
        Self {
            m_cost: 65536, // 64 MiB memory
            t_cost: 3,
            p_cost: 4,
        }
    }
}

/// Account-wide encryption
pub struct AccountEncryption {
    cipher: Aes256Gcm,
}

impl AccountEncryption {
    /// Derive the account key from its passphrase
    pub fn derive(account_id: &str, passphrase: &str) -> Result<Self, EncryptionError> {
        Self::derive_with_params(account_id, passphrase, KeyParams::default())
    }

    pub fn derive_with_params(
        account_id: &str,
        passphrase: &str,
        params: KeyParams,
    ) -> Result<Self, EncryptionError> {
        let key = Self::derive_key(account_id, passphrase, params)?;
        Ok(Self::from_key(key))
    }

    /// Build from an already derived 256-bit key
    pub fn from_key(key: [u8; 32]) -> Self {
        let cipher = Aes256Gcm::new(&key.into());
        Self { cipher }
    }

    fn derive_key(
        account_id: &str,
        passphrase: &str,
        params: KeyParams,
    ) -> Result<[u8; 32], EncryptionError> {
        if account_id.is_empty() {
            return Err(EncryptionError::KeyDerivation("Empty account id".to_string()));
        }

        // Argon2 wants a salt of at least 8 bytes; hash to a fixed width
        let mut hasher = Sha256::new();
        hasher.update(account_id.as_bytes());
        hasher.update(APP_SALT);
        let salt = hasher.finalize();

        debug!(
            "Deriving account key (account_id: {}, passphrase len: {})",
            account_id,
            passphrase.len()
        );

        let mut output_key = [0u8; 32]; // AES-256 key size

        let argon_params = ParamsBuilder::new()
            .m_cost(params.m_cost)
            .t_cost(params.t_cost)
            .p_cost(params.p_cost)
            .build()
            .map_err(|e| {
                EncryptionError::KeyDerivation(format!("Failed to build Argon2 params: {}", e))
            })?;

        let argon2 = Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            argon_params,
        );

        argon2
            .hash_password_into(passphrase.as_bytes(), &salt, &mut output_key)
            .map_err(|e| {
                EncryptionError::KeyDerivation(format!("Argon2 key derivation failed: {}", e))
            })?;

        Ok(output_key)
    }

    /// Encrypt a plaintext string
    ///
    /// Returns a base64-encoded string containing: nonce || ciphertext
    pub fn encrypt(&self, plaintext: &str) -> Result<String, EncryptionError> {
        if plaintext.is_empty() {
            return Err(EncryptionError::Encryption(
                "Cannot encrypt empty plaintext".to_string(),
            ));
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        use aes_gcm::aead::rand_core::RngCore;
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| EncryptionError::Encryption(format!("AES-GCM encryption failed: {}", e)))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&combined))
    }

    /// Decrypt a base64-encoded encrypted string
    ///
    /// Expects format: nonce || ciphertext
    pub fn decrypt(&self, encrypted: &str) -> Result<String, EncryptionError> {
        if encrypted.is_empty() {
            return Err(EncryptionError::InvalidFormat(
                "Cannot decrypt empty string".to_string(),
            ));
        }

        let combined = BASE64.decode(encrypted).map_err(|e| {
            EncryptionError::InvalidFormat(format!("Invalid base64 encoding: {}", e))
        })?;

        if combined.len() < NONCE_SIZE {
            return Err(EncryptionError::InvalidFormat(format!(
                "Encrypted data too short: {} bytes",
                combined.len()
            )));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext_bytes = self.cipher.decrypt(nonce, ciphertext).map_err(|e| {
            EncryptionError::Decryption(format!(
                "AES-GCM decryption failed (possibly wrong key or corrupted data): {}",
                e
            ))
        })?;

        String::from_utf8(plaintext_bytes).map_err(|e| {
            EncryptionError::Decryption(format!("Decrypted data is not valid UTF-8: {}", e))
        })
    }
}
