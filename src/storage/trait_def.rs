use crate::models::{
    Campaign, CampaignStatus, NewCampaign, NewScan, PixelCredential, ScanAggregate, ScanRecord,
};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("short code or slug already belongs to an active campaign")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict,
            _ => StorageError::Other(e.into()),
        }
    }
}

/// Columns selected into [`crate::models::CampaignRow`]
pub(crate) const CAMPAIGN_COLUMNS: &str = "id, owner_id, name, short_code, slug, destination_url, \
     cookie_duration_days, bridge_enabled, bridge_duration_ms, status, pixel_id, access_token, \
     access_token_ciphertext, access_token_iv, access_token_version, created_at";

pub(crate) const SCAN_COLUMNS: &str = "id, campaign_id, visitor_id, ip_hash, locality, city, postcode, \
     state, country, country_code, confidence_km, geo_source, is_vpn, is_proxy, is_tor, device_type, \
     browser, os, referrer, is_first_scan, event_id, scanned_at";

pub(crate) fn unix_now() -> Result<i64> {
    Ok(std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs() as i64)
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (run migrations, etc.)
    async fn init(&self) -> Result<()>;

    /// Create a campaign. Fails with `Conflict` when its short code or slug
    /// is already owned by another active campaign.
    async fn create_campaign(&self, campaign: &NewCampaign) -> StorageResult<Campaign>;

    /// Move the non-archived campaign owning `short_code` to `status`
    async fn set_campaign_status(&self, short_code: &str, status: CampaignStatus) -> StorageResult<bool>;

    /// Active campaign by short code or slug: exact match first, then
    /// lowercased. Paused and archived campaigns are never returned.
    async fn find_active_campaign(&self, code: &str) -> Result<Option<Campaign>>;

    /// Account-level fallback pixel for campaigns without their own
    async fn get_account_pixel(&self, owner_id: &str) -> Result<Option<PixelCredential>>;

    async fn upsert_account_pixel(&self, owner_id: &str, pixel: &PixelCredential) -> Result<()>;

    /// Append a scan and additively upsert its aggregate bucket in one
    /// transaction. A repeated event id is ignored; returns whether a row
    /// was written.
    async fn insert_scan(&self, scan: &NewScan) -> Result<bool>;

    async fn get_aggregates(&self, campaign_id: i64) -> Result<Vec<ScanAggregate>>;

    /// Most recent scans first
    async fn list_scans(&self, campaign_id: i64, limit: i64) -> Result<Vec<ScanRecord>>;
}
