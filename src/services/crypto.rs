//! Secret encryption at rest
//!
//! Secret settings are sealed with AES-256-GCM. The key is the SHA-256 of
//! the configured key material, so any non-empty string works as a key.
//!
//! Stored format: `enc:v1:` followed by base64 of `nonce (12 bytes) ||
//! ciphertext || tag (16 bytes)`. A fresh random nonce is used per value.
//! Values without the prefix predate encryption and are read back as-is.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::{general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Prefix marking an encrypted value
pub const ENCRYPTED_PREFIX: &str = "enc:v1:";

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encrypt(String),

    /// Wrong key, tampered value or corrupt encoding
    #[error("Decryption failed: {0}")]
    Decrypt(String),
}

/// AES-256-GCM sealing for secret settings
#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBox").finish_non_exhaustive()
    }
}

impl SecretBox {
    pub fn new(key_material: &str) -> Self {
        let digest = Sha256::digest(key_material.as_bytes());
        let key = aes_gcm::Key::<Aes256Gcm>::from_slice(digest.as_slice());
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        getrandom::fill(&mut nonce_bytes)
            .map_err(|e| CryptoError::Encrypt(format!("No randomness for nonce: {}", e)))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::Encrypt(format!("AES-GCM failed: {}", e)))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", ENCRYPTED_PREFIX, STANDARD.encode(sealed)))
    }

    /// Open a stored value. Unprefixed values are returned unchanged.
    pub fn decrypt(&self, stored: &str) -> Result<String, CryptoError> {
        let Some(encoded) = stored.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(stored.to_string());
        };

        let sealed = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::Decrypt(format!("Invalid base64: {}", e)))?;
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Decrypt("Encrypted value too short".to_string()));
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt("Authentication failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| CryptoError::Decrypt(format!("Invalid UTF-8: {}", e)))
    }
}

pub fn is_encrypted(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let secrets = SecretBox::new("test-key");
        let sealed = secrets.encrypt("smtp-password").unwrap();
        assert!(is_encrypted(&sealed));
        assert!(!sealed.contains("smtp-password"));
        assert_eq!(secrets.decrypt(&sealed).unwrap(), "smtp-password");
    }

    #[test]
    fn test_nonce_is_fresh_per_value() {
        let secrets = SecretBox::new("test-key");
        assert_ne!(secrets.encrypt("same").unwrap(), secrets.encrypt("same").unwrap());
    }

    #[test]
    fn test_legacy_plaintext_passes_through() {
        let secrets = SecretBox::new("test-key");
        assert!(!is_encrypted("plain-old-key"));
        assert_eq!(secrets.decrypt("plain-old-key").unwrap(), "plain-old-key");
        assert_eq!(secrets.decrypt("").unwrap(), "");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = SecretBox::new("key-a").encrypt("secret").unwrap();
        assert!(matches!(
            SecretBox::new("key-b").decrypt(&sealed),
            Err(CryptoError::Decrypt(_))
        ));
    }

    #[test]
    fn test_tampered_value_fails() {
        let secrets = SecretBox::new("test-key");
        let sealed = secrets.encrypt("secret").unwrap();
        let mut raw = STANDARD.decode(&sealed[ENCRYPTED_PREFIX.len()..]).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = format!("{}{}", ENCRYPTED_PREFIX, STANDARD.encode(raw));
        assert!(secrets.decrypt(&tampered).is_err());

        assert!(secrets.decrypt("enc:v1:not base64!").is_err());
        assert!(secrets.decrypt("enc:v1:AAAA").is_err());
    }

    #[test]
    fn test_unicode_secret() {
        let secrets = SecretBox::new("🔑");
        let sealed = secrets.encrypt("пароль").unwrap();
        assert_eq!(secrets.decrypt(&sealed).unwrap(), "пароль");
    }
}
