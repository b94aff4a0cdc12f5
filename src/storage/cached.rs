use crate::models::{
    Campaign, CampaignStatus, NewCampaign, NewScan, PixelCredential, ScanAggregate, ScanRecord,
};
use crate::storage::{Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Read-through cache for the lookups on the redirect path.
///
/// Misses are cached too, so an unknown code hammered by a printed QR code
/// does not hit the database on every scan. Any campaign write flushes the
/// campaign cache since one write can change what several codes resolve to.
pub struct CachedStorage {
    inner: Arc<dyn Storage>,
    campaigns: Cache<String, Option<Campaign>>,
    account_pixels: Cache<String, Option<PixelCredential>>,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn Storage>, max_cache_entries: u64, ttl_secs: u64) -> Self {
        let ttl = Duration::from_secs(ttl_secs.max(1));

        let campaigns = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(ttl)
            .build();

        let account_pixels = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(ttl)
            .build();

        Self {
            inner,
            campaigns,
            account_pixels,
        }
    }

    fn invalidate_campaigns(&self) {
        self.campaigns.invalidate_all();
    }
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn create_campaign(&self, campaign: &NewCampaign) -> StorageResult<Campaign> {
        let created = self.inner.create_campaign(campaign).await?;
        self.invalidate_campaigns();
        Ok(created)
    }

    async fn set_campaign_status(&self, short_code: &str, status: CampaignStatus) -> StorageResult<bool> {
        let changed = self.inner.set_campaign_status(short_code, status).await?;
        if changed {
            self.invalidate_campaigns();
        }
        Ok(changed)
    }

    async fn find_active_campaign(&self, code: &str) -> Result<Option<Campaign>> {
        if let Some(cached) = self.campaigns.get(code).await {
            return Ok(cached);
        }

        let result = self.inner.find_active_campaign(code).await?;
        self.campaigns.insert(code.to_string(), result.clone()).await;

        Ok(result)
    }

    async fn get_account_pixel(&self, owner_id: &str) -> Result<Option<PixelCredential>> {
        if let Some(cached) = self.account_pixels.get(owner_id).await {
            return Ok(cached);
        }

        let result = self.inner.get_account_pixel(owner_id).await?;
        self.account_pixels
            .insert(owner_id.to_string(), result.clone())
            .await;

        Ok(result)
    }

    async fn upsert_account_pixel(&self, owner_id: &str, pixel: &PixelCredential) -> Result<()> {
        self.inner.upsert_account_pixel(owner_id, pixel).await?;
        self.account_pixels.invalidate(owner_id).await;
        Ok(())
    }

    async fn insert_scan(&self, scan: &NewScan) -> Result<bool> {
        self.inner.insert_scan(scan).await
    }

    async fn get_aggregates(&self, campaign_id: i64) -> Result<Vec<ScanAggregate>> {
        self.inner.get_aggregates(campaign_id).await
    }

    async fn list_scans(&self, campaign_id: i64, limit: i64) -> Result<Vec<ScanRecord>> {
        self.inner.list_scans(campaign_id, limit).await
    }
}
