//! AES-256-GCM encryption of third-party credentials at rest

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version tag written by [`CredentialCipher::encrypt`]
pub const CIPHER_VERSION: u8 = 1;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption key is not configured")]
    MissingKey,
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),
    #[error("unsupported cipher version {0}")]
    UnsupportedVersion(u8),
    #[error("malformed encrypted payload: {0}")]
    Malformed(String),
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed (wrong key or tampered payload)")]
    Decrypt,
}

/// Stored form of an encrypted secret; ciphertext includes the GCM tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    /// Base64 ciphertext
    pub ciphertext: String,
    /// Base64 96-bit nonce
    pub iv: String,
    pub version: u8,
}

#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// Build from raw key bytes (must be exactly 32)
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Parse a configured key: 64 hex chars, or base64 of 32 bytes
    pub fn from_key_str(key: &str) -> Result<Self, CryptoError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(CryptoError::MissingKey);
        }

        if key.len() == KEY_LEN * 2 {
            if let Ok(bytes) = hex::decode(key) {
                return Self::new(&bytes);
            }
        }

        let bytes = BASE64_STANDARD
            .decode(key)
            .map_err(|_| CryptoError::InvalidKey("neither 64 hex chars nor base64".to_string()))?;
        Self::new(&bytes)
    }

    /// Optional cipher from configuration; a present but broken key is an error
    pub fn from_config(key: Option<&str>) -> Result<Option<Self>, CryptoError> {
        key.map(Self::from_key_str).transpose()
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret, CryptoError> {
        let iv = rand::random::<[u8; NONCE_LEN]>();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        Ok(EncryptedSecret {
            ciphertext: BASE64_STANDARD.encode(ciphertext),
            iv: BASE64_STANDARD.encode(iv),
            version: CIPHER_VERSION,
        })
    }

    pub fn decrypt(&self, secret: &EncryptedSecret) -> Result<String, CryptoError> {
        if secret.version != CIPHER_VERSION {
            return Err(CryptoError::UnsupportedVersion(secret.version));
        }

        let iv = BASE64_STANDARD
            .decode(&secret.iv)
            .map_err(|e| CryptoError::Malformed(format!("iv: {e}")))?;
        if iv.len() != NONCE_LEN {
            return Err(CryptoError::Malformed(format!(
                "iv must be {NONCE_LEN} bytes, got {}",
                iv.len()
            )));
        }
        let ciphertext = BASE64_STANDARD
            .decode(&secret.ciphertext)
            .map_err(|e| CryptoError::Malformed(format!("ciphertext: {e}")))?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
            .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Malformed("plaintext is not UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngExt;

    const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn random_ascii(len: usize) -> String {
        let mut rng = rand::rng();
        (0..len)
            .map(|_| rng.random_range(0x20u8..0x7f) as char)
            .collect()
    }

    #[test]
    fn test_round_trip_ascii_lengths() {
        let cipher = CredentialCipher::from_key_str(TEST_KEY).unwrap();
        for len in [40, 41, 64, 128, 255, 499, 500] {
            let plaintext = random_ascii(len);
            let encrypted = cipher.encrypt(&plaintext).unwrap();
            assert_eq!(encrypted.version, CIPHER_VERSION);
            assert_eq!(cipher.decrypt(&encrypted).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let cipher = CredentialCipher::from_key_str(TEST_KEY).unwrap();
        let a = cipher.encrypt("same access token value, encrypted twice").unwrap();
        let b = cipher.encrypt("same access token value, encrypted twice").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let cipher = CredentialCipher::from_key_str(TEST_KEY).unwrap();
        let mut encrypted = cipher.encrypt("EAAB-long-lived-token-for-the-pixel-0001").unwrap();
        encrypted.version = 2;
        assert!(matches!(
            cipher.decrypt(&encrypted),
            Err(CryptoError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = CredentialCipher::from_key_str(TEST_KEY).unwrap();
        let other = CredentialCipher::new(&[7u8; 32]).unwrap();
        let encrypted = cipher.encrypt("EAAB-long-lived-token-for-the-pixel-0001").unwrap();
        assert!(matches!(other.decrypt(&encrypted), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_key_parsing() {
        assert!(matches!(
            CredentialCipher::from_key_str(""),
            Err(CryptoError::MissingKey)
        ));
        assert!(matches!(
            CredentialCipher::from_key_str("c2hvcnQ="),
            Err(CryptoError::InvalidKey(_))
        ));
        let b64 = BASE64_STANDARD.encode([9u8; 32]);
        assert!(CredentialCipher::from_key_str(&b64).is_ok());
        assert!(CredentialCipher::from_config(None).unwrap().is_none());
    }

    #[test]
    fn test_malformed_iv() {
        let cipher = CredentialCipher::from_key_str(TEST_KEY).unwrap();
        let secret = EncryptedSecret {
            ciphertext: "AAAA".to_string(),
            iv: "not base64!".to_string(),
            version: CIPHER_VERSION,
        };
        assert!(matches!(cipher.decrypt(&secret), Err(CryptoError::Malformed(_))));
    }
}
