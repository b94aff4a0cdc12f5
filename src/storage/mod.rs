pub mod cached;
pub mod postgres;
pub mod sqlite;
pub mod trait_def;

pub use cached::CachedStorage;
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{Storage, StorageError, StorageResult};

use crate::models::PixelCredential;
use crate::privacy::EncryptedSecret;

type PixelParts = (Option<String>, Option<String>, Option<String>, Option<String>, Option<i64>);

/// Account pixel row (pixel_id, token, ciphertext, iv, version) into a credential
fn pixel_from_parts((pixel_id, access_token, ciphertext, iv, version): PixelParts) -> PixelCredential {
    let access_token_encrypted = match (ciphertext, iv) {
        (Some(ciphertext), Some(iv)) => Some(EncryptedSecret {
            ciphertext,
            iv,
            version: version.unwrap_or(0).clamp(0, u8::MAX as i64) as u8,
        }),
        _ => None,
    };

    PixelCredential {
        pixel_id,
        access_token,
        access_token_encrypted,
    }
}
