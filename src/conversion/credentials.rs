//! Which pixel and access token a campaign's conversion events go to

use crate::models::PixelCredential;
use crate::privacy::{CredentialCipher, CryptoError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialLevel {
    Campaign,
    Account,
}

impl CredentialLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialLevel::Campaign => "campaign",
            CredentialLevel::Account => "account",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelTarget {
    pub pixel_id: String,
    pub access_token: String,
    pub level: CredentialLevel,
}

/// Campaign-level integration first, then the owning account's.
///
/// A level counts only with both a pixel and a stored token; a campaign pixel
/// without a token defers to the account. A stored but undecryptable token
/// still selects its level, so a key problem surfaces instead of rerouting.
pub fn select_credential<'a>(
    campaign: &'a PixelCredential,
    account: Option<&'a PixelCredential>,
) -> Option<(&'a PixelCredential, CredentialLevel)> {
    if campaign.is_dispatchable() {
        return Some((campaign, CredentialLevel::Campaign));
    }
    account
        .filter(|credential| credential.is_dispatchable())
        .map(|credential| (credential, CredentialLevel::Account))
}

/// Plaintext token if present, otherwise the decrypted at-rest token.
///
/// An encrypted token without a usable key is an error, never a silent skip.
pub fn resolve_access_token(
    credential: &PixelCredential,
    cipher: Option<&CredentialCipher>,
) -> Result<Option<String>, CryptoError> {
    if let Some(token) = credential
        .access_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        return Ok(Some(token.to_string()));
    }

    match &credential.access_token_encrypted {
        Some(secret) => {
            let cipher = cipher.ok_or(CryptoError::MissingKey)?;
            cipher.decrypt(secret).map(Some)
        }
        None => Ok(None),
    }
}

/// `Ok(None)` when no integration is configured at either level
pub fn resolve_pixel_target(
    campaign: &PixelCredential,
    account: Option<&PixelCredential>,
    cipher: Option<&CredentialCipher>,
) -> Result<Option<PixelTarget>, CryptoError> {
    let Some((credential, level)) = select_credential(campaign, account) else {
        return Ok(None);
    };

    let Some(access_token) = resolve_access_token(credential, cipher)? else {
        return Ok(None);
    };

    Ok(Some(PixelTarget {
        pixel_id: credential.pixel_id.clone().unwrap_or_default().trim().to_string(),
        access_token,
        level,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> CredentialCipher {
        CredentialCipher::new(&[3u8; 32]).unwrap()
    }

    fn plain(pixel: &str, token: &str) -> PixelCredential {
        PixelCredential {
            pixel_id: Some(pixel.to_string()),
            access_token: Some(token.to_string()),
            access_token_encrypted: None,
        }
    }

    #[test]
    fn test_campaign_pixel_takes_precedence() {
        let campaign = plain("111", "campaign-token");
        let account = plain("222", "account-token");
        let target = resolve_pixel_target(&campaign, Some(&account), None)
            .unwrap()
            .unwrap();
        assert_eq!(target.pixel_id, "111");
        assert_eq!(target.access_token, "campaign-token");
        assert_eq!(target.level, CredentialLevel::Campaign);
    }

    #[test]
    fn test_account_fallback() {
        let account = plain("222", "account-token");
        let target = resolve_pixel_target(&PixelCredential::default(), Some(&account), None)
            .unwrap()
            .unwrap();
        assert_eq!(target.pixel_id, "222");
        assert_eq!(target.level, CredentialLevel::Account);
    }

    #[test]
    fn test_nothing_configured_is_skipped() {
        assert!(resolve_pixel_target(&PixelCredential::default(), None, None)
            .unwrap()
            .is_none());

        let pixel_without_token = PixelCredential {
            pixel_id: Some("111".to_string()),
            ..Default::default()
        };
        assert!(resolve_pixel_target(&pixel_without_token, None, None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_campaign_pixel_without_token_uses_account() {
        let campaign = PixelCredential {
            pixel_id: Some("111".to_string()),
            access_token: Some("  ".to_string()),
            access_token_encrypted: None,
        };
        let account = plain("222", "account-token");
        let target = resolve_pixel_target(&campaign, Some(&account), None)
            .unwrap()
            .unwrap();
        assert_eq!(target.pixel_id, "222");
        assert_eq!(target.access_token, "account-token");
        assert_eq!(target.level, CredentialLevel::Account);
    }

    #[test]
    fn test_undecryptable_campaign_token_does_not_fall_through() {
        let campaign = PixelCredential {
            pixel_id: Some("111".to_string()),
            access_token: None,
            access_token_encrypted: Some(cipher().encrypt("EAAB-secret-token").unwrap()),
        };
        let account = plain("222", "account-token");
        assert!(matches!(
            resolve_pixel_target(&campaign, Some(&account), None),
            Err(CryptoError::MissingKey)
        ));
    }

    #[test]
    fn test_encrypted_token_is_decrypted() {
        let cipher = cipher();
        let credential = PixelCredential {
            pixel_id: Some("111".to_string()),
            access_token: None,
            access_token_encrypted: Some(cipher.encrypt("EAAB-secret-token").unwrap()),
        };
        let target = resolve_pixel_target(&credential, None, Some(&cipher))
            .unwrap()
            .unwrap();
        assert_eq!(target.access_token, "EAAB-secret-token");
    }

    #[test]
    fn test_encrypted_token_without_key_errors() {
        let credential = PixelCredential {
            pixel_id: Some("111".to_string()),
            access_token: None,
            access_token_encrypted: Some(cipher().encrypt("EAAB-secret-token").unwrap()),
        };
        assert!(matches!(
            resolve_pixel_target(&credential, None, None),
            Err(CryptoError::MissingKey)
        ));
    }

    #[test]
    fn test_plaintext_preferred_over_encrypted() {
        let cipher = cipher();
        let credential = PixelCredential {
            pixel_id: Some("111".to_string()),
            access_token: Some("plain".to_string()),
            access_token_encrypted: Some(cipher.encrypt("encrypted").unwrap()),
        };
        let token = resolve_access_token(&credential, None).unwrap();
        assert_eq!(token.as_deref(), Some("plain"));
    }
}
