//! Pseudonymisation helpers and credential encryption
//!
//! Raw client IPs never reach storage: they are reduced to a salted
//! HMAC-SHA256 digest here. Conversion event ids also come from this module
//! so the bridge page and the server-side event share one token.

pub mod cipher;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::net::IpAddr;

pub use cipher::{CredentialCipher, CryptoError, EncryptedSecret, CIPHER_VERSION};

/// Length in hex characters of ids from [`generate_event_id`]
pub const EVENT_ID_HEX_LEN: usize = 32;

/// Salted one-way hashing of client IP addresses
#[derive(Clone)]
pub struct IpHasher {
    salt: Option<Vec<u8>>,
}

impl IpHasher {
    pub fn new(salt: Option<&str>) -> Self {
        Self {
            salt: salt.map(|s| s.as_bytes().to_vec()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.salt.is_some()
    }

    /// Hex HMAC-SHA256 of the textual IP keyed by the salt.
    ///
    /// Returns `None` without a salt; an unsalted hash of the IPv4 space is
    /// trivially reversible, so nothing is stored instead.
    pub fn hash_ip(&self, ip: IpAddr) -> Option<String> {
        let salt = self.salt.as_ref()?;
        let mut mac = Hmac::<Sha256>::new_from_slice(salt).ok()?;
        mac.update(ip.to_string().as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Random 128-bit dedup token rendered as 32 lowercase hex chars
pub fn generate_event_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

pub fn is_event_id(candidate: &str) -> bool {
    candidate.len() == EVENT_ID_HEX_LEN && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Plain SHA-256 hex digest
pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}
