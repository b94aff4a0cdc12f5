use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::privacy::EncryptedSecret;

/// Bridge interlude length used when a campaign does not set one
pub const DEFAULT_BRIDGE_DURATION_MS: u64 = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Paused,
    Archived,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            "archived" => Ok(CampaignStatus::Archived),
            other => Err(anyhow::anyhow!("unknown campaign status '{other}'")),
        }
    }
}

/// Lifetime of the visitor and campaign-visit cookies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CookieDuration {
    OneDay,
    OneWeek,
    ThirtyDays,
    NinetyDays,
    OneYear,
}

impl CookieDuration {
    pub const fn days(&self) -> i64 {
        match self {
            CookieDuration::OneDay => 1,
            CookieDuration::OneWeek => 7,
            CookieDuration::ThirtyDays => 30,
            CookieDuration::NinetyDays => 90,
            CookieDuration::OneYear => 365,
        }
    }

    pub fn from_days(days: i64) -> Option<Self> {
        match days {
            1 => Some(CookieDuration::OneDay),
            7 => Some(CookieDuration::OneWeek),
            30 => Some(CookieDuration::ThirtyDays),
            90 => Some(CookieDuration::NinetyDays),
            365 => Some(CookieDuration::OneYear),
            _ => None,
        }
    }
}

impl Default for CookieDuration {
    fn default() -> Self {
        CookieDuration::ThirtyDays
    }
}

/// Ad-platform pixel and access credential, at campaign or account level.
///
/// The access token is held either in plaintext or encrypted at rest; the
/// dispatcher prefers plaintext and decrypts otherwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PixelCredential {
    pub pixel_id: Option<String>,
    pub access_token: Option<String>,
    pub access_token_encrypted: Option<EncryptedSecret>,
}

impl PixelCredential {
    pub fn has_pixel(&self) -> bool {
        self.pixel_id.as_deref().is_some_and(|id| !id.trim().is_empty())
    }

    /// A token is stored, in plaintext or encrypted
    pub fn has_token(&self) -> bool {
        self.access_token.as_deref().is_some_and(|t| !t.trim().is_empty())
            || self.access_token_encrypted.is_some()
    }

    /// Pixel plus a token: enough to send server-side events
    pub fn is_dispatchable(&self) -> bool {
        self.has_pixel() && self.has_token()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub owner_id: Option<String>,
    pub name: String,
    pub short_code: String,
    pub slug: Option<String>,
    pub destination_url: String,
    pub cookie_duration: CookieDuration,
    pub bridge_enabled: bool,
    pub bridge_duration_ms: u64,
    pub status: CampaignStatus,
    pub pixel: PixelCredential,
    pub created_at: i64,
}

impl Campaign {
    pub fn is_active(&self) -> bool {
        self.status == CampaignStatus::Active
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCampaign {
    pub owner_id: Option<String>,
    pub name: String,
    pub short_code: String,
    pub slug: Option<String>,
    pub destination_url: String,
    pub cookie_duration: CookieDuration,
    pub bridge_enabled: bool,
    pub bridge_duration_ms: u64,
    #[serde(default)]
    pub pixel: PixelCredential,
}

impl NewCampaign {
    pub fn new(short_code: &str, destination_url: &str) -> Self {
        Self {
            owner_id: None,
            name: short_code.to_string(),
            short_code: short_code.to_string(),
            slug: None,
            destination_url: destination_url.to_string(),
            cookie_duration: CookieDuration::default(),
            bridge_enabled: false,
            bridge_duration_ms: DEFAULT_BRIDGE_DURATION_MS,
            pixel: PixelCredential::default(),
        }
    }
}

/// Flat row shape shared by the SQLite and Postgres campaign queries
#[derive(Debug, Clone, FromRow)]
pub struct CampaignRow {
    pub id: i64,
    pub owner_id: Option<String>,
    pub name: String,
    pub short_code: String,
    pub slug: Option<String>,
    pub destination_url: String,
    pub cookie_duration_days: i64,
    pub bridge_enabled: bool,
    pub bridge_duration_ms: Option<i64>,
    pub status: String,
    pub pixel_id: Option<String>,
    pub access_token: Option<String>,
    pub access_token_ciphertext: Option<String>,
    pub access_token_iv: Option<String>,
    pub access_token_version: Option<i64>,
    pub created_at: i64,
}

impl CampaignRow {
    pub fn into_campaign(self) -> Campaign {
        let status = self.status.parse().unwrap_or_else(|_| {
            tracing::warn!(campaign_id = self.id, status = %self.status, "unknown campaign status, treating as paused");
            CampaignStatus::Paused
        });

        let access_token_encrypted = match (self.access_token_ciphertext, self.access_token_iv) {
            (Some(ciphertext), Some(iv)) => Some(EncryptedSecret {
                ciphertext,
                iv,
                version: self.access_token_version.unwrap_or(0).clamp(0, u8::MAX as i64) as u8,
            }),
            _ => None,
        };

        Campaign {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            short_code: self.short_code,
            slug: self.slug,
            destination_url: self.destination_url,
            cookie_duration: CookieDuration::from_days(self.cookie_duration_days).unwrap_or_default(),
            bridge_enabled: self.bridge_enabled,
            bridge_duration_ms: self
                .bridge_duration_ms
                .filter(|ms| *ms > 0)
                .map(|ms| ms as u64)
                .unwrap_or(DEFAULT_BRIDGE_DURATION_MS),
            status,
            pixel: PixelCredential {
                pixel_id: self.pixel_id,
                access_token: self.access_token,
                access_token_encrypted,
            },
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> CampaignRow {
        CampaignRow {
            id: 7,
            owner_id: Some("owner".to_string()),
            name: "Spring".to_string(),
            short_code: "abc123".to_string(),
            slug: None,
            destination_url: "https://example.com".to_string(),
            cookie_duration_days: 90,
            bridge_enabled: true,
            bridge_duration_ms: None,
            status: "active".to_string(),
            pixel_id: None,
            access_token: None,
            access_token_ciphertext: Some("c2VjcmV0".to_string()),
            access_token_iv: Some("aXY=".to_string()),
            access_token_version: Some(1),
            created_at: 0,
        }
    }

    #[test]
    fn test_row_projection() {
        let campaign = row().into_campaign();
        assert_eq!(campaign.cookie_duration, CookieDuration::NinetyDays);
        assert_eq!(campaign.bridge_duration_ms, DEFAULT_BRIDGE_DURATION_MS);
        assert!(campaign.is_active());
        let encrypted = campaign.pixel.access_token_encrypted.unwrap();
        assert_eq!(encrypted.version, 1);
    }

    #[test]
    fn test_unknown_duration_falls_back() {
        let mut r = row();
        r.cookie_duration_days = 12;
        r.status = "bogus".to_string();
        let campaign = r.into_campaign();
        assert_eq!(campaign.cookie_duration, CookieDuration::ThirtyDays);
        assert_eq!(campaign.status, CampaignStatus::Paused);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Archived".parse::<CampaignStatus>().unwrap(), CampaignStatus::Archived);
        assert!("deleted".parse::<CampaignStatus>().is_err());
    }
}
