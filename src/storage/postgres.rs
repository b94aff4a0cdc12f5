use crate::models::{
    Campaign, CampaignRow, CampaignStatus, NewCampaign, NewScan, PixelCredential, ScanAggregate,
    ScanRecord,
};
use crate::storage::trait_def::{unix_now, CAMPAIGN_COLUMNS, SCAN_COLUMNS};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

fn secret_parts(pixel: &PixelCredential) -> (Option<String>, Option<String>, Option<i64>) {
    pixel
        .access_token_encrypted
        .as_ref()
        .map(|s| (Some(s.ciphertext.clone()), Some(s.iv.clone()), Some(s.version as i64)))
        .unwrap_or((None, None, None))
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS campaigns (
                id BIGSERIAL PRIMARY KEY,
                owner_id TEXT,
                name TEXT NOT NULL,
                short_code TEXT NOT NULL,
                slug TEXT,
                destination_url TEXT NOT NULL,
                cookie_duration_days BIGINT NOT NULL DEFAULT 30,
                bridge_enabled BOOLEAN NOT NULL DEFAULT FALSE,
                bridge_duration_ms BIGINT,
                status TEXT NOT NULL DEFAULT 'active',
                pixel_id TEXT,
                access_token TEXT,
                access_token_ciphertext TEXT,
                access_token_iv TEXT,
                access_token_version BIGINT,
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_campaigns_active_code ON campaigns(short_code) WHERE status = 'active'",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_campaigns_active_slug ON campaigns(slug) WHERE status = 'active' AND slug IS NOT NULL",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_campaigns_lower_code ON campaigns(LOWER(short_code)) WHERE status = 'active'",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account_pixels (
                owner_id TEXT PRIMARY KEY,
                pixel_id TEXT,
                access_token TEXT,
                access_token_ciphertext TEXT,
                access_token_iv TEXT,
                access_token_version BIGINT,
                updated_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scans (
                id BIGSERIAL PRIMARY KEY,
                campaign_id BIGINT NOT NULL,
                visitor_id TEXT NOT NULL,
                ip_hash TEXT,
                locality TEXT,
                city TEXT,
                postcode TEXT,
                state TEXT,
                state_code TEXT,
                country TEXT,
                country_code TEXT,
                latitude DOUBLE PRECISION,
                longitude DOUBLE PRECISION,
                confidence_km DOUBLE PRECISION,
                geo_source TEXT NOT NULL,
                isp TEXT,
                network_type TEXT,
                connection_type TEXT,
                is_vpn BOOLEAN NOT NULL DEFAULT FALSE,
                is_proxy BOOLEAN NOT NULL DEFAULT FALSE,
                is_tor BOOLEAN NOT NULL DEFAULT FALSE,
                device_type TEXT NOT NULL,
                browser TEXT,
                browser_version TEXT,
                os TEXT,
                os_version TEXT,
                referrer TEXT,
                screen_width BIGINT,
                screen_height BIGINT,
                is_first_scan BOOLEAN NOT NULL DEFAULT FALSE,
                event_id TEXT NOT NULL UNIQUE,
                scanned_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_scans_campaign ON scans(campaign_id, scanned_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan_aggregates (
                campaign_id BIGINT NOT NULL,
                scan_date TEXT NOT NULL,
                scan_hour BIGINT NOT NULL,
                locality TEXT NOT NULL DEFAULT '',
                postcode TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL DEFAULT '',
                total_scans BIGINT NOT NULL DEFAULT 0,
                unique_visitors BIGINT NOT NULL DEFAULT 0,
                mobile_scans BIGINT NOT NULL DEFAULT 0,
                tablet_scans BIGINT NOT NULL DEFAULT 0,
                desktop_scans BIGINT NOT NULL DEFAULT 0,
                PRIMARY KEY (campaign_id, scan_date, scan_hour, locality, postcode, state)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create_campaign(&self, campaign: &NewCampaign) -> StorageResult<Campaign> {
        let created_at = unix_now()?;
        let slug = campaign.slug.as_deref();
        let slug_or_code = slug.unwrap_or(&campaign.short_code);
        let (ciphertext, iv, version) = secret_parts(&campaign.pixel);

        let mut tx = self.pool.begin().await?;

        let taken: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM campaigns
            WHERE status = 'active'
              AND (short_code IN ($1, $2) OR slug IN ($1, $2))
            "#,
        )
        .bind(&campaign.short_code)
        .bind(slug_or_code)
        .fetch_one(&mut *tx)
        .await?;

        if taken > 0 {
            return Err(StorageError::Conflict);
        }

        let sql = format!(
            r#"
            INSERT INTO campaigns (
                owner_id, name, short_code, slug, destination_url, cookie_duration_days,
                bridge_enabled, bridge_duration_ms, status, pixel_id, access_token,
                access_token_ciphertext, access_token_iv, access_token_version, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'active', $9, $10, $11, $12, $13, $14)
            RETURNING {CAMPAIGN_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, CampaignRow>(&sql)
            .bind(campaign.owner_id.as_deref())
            .bind(&campaign.name)
            .bind(&campaign.short_code)
            .bind(slug)
            .bind(&campaign.destination_url)
            .bind(campaign.cookie_duration.days())
            .bind(campaign.bridge_enabled)
            .bind(campaign.bridge_duration_ms as i64)
            .bind(campaign.pixel.pixel_id.as_deref())
            .bind(campaign.pixel.access_token.as_deref())
            .bind(ciphertext)
            .bind(iv)
            .bind(version)
            .bind(created_at)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(row.into_campaign())
    }

    async fn set_campaign_status(&self, short_code: &str, status: CampaignStatus) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = $1
            WHERE id = (
                SELECT id FROM campaigns
                WHERE short_code = $2 AND status != 'archived'
                ORDER BY id DESC
                LIMIT 1
            )
            "#,
        )
        .bind(status.as_str())
        .bind(short_code)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_active_campaign(&self, code: &str) -> Result<Option<Campaign>> {
        let exact = format!(
            r#"
            SELECT {CAMPAIGN_COLUMNS}
            FROM campaigns
            WHERE status = 'active' AND (short_code = $1 OR slug = $1)
            ORDER BY (short_code = $1) DESC
            LIMIT 1
            "#
        );

        if let Some(row) = sqlx::query_as::<_, CampaignRow>(&exact)
            .bind(code)
            .fetch_optional(self.pool.as_ref())
            .await?
        {
            return Ok(Some(row.into_campaign()));
        }

        let folded = format!(
            r#"
            SELECT {CAMPAIGN_COLUMNS}
            FROM campaigns
            WHERE status = 'active' AND (LOWER(short_code) = $1 OR LOWER(slug) = $1)
            ORDER BY (LOWER(short_code) = $1) DESC, id
            LIMIT 1
            "#
        );

        let row = sqlx::query_as::<_, CampaignRow>(&folded)
            .bind(code.to_lowercase())
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(row.map(CampaignRow::into_campaign))
    }

    async fn get_account_pixel(&self, owner_id: &str) -> Result<Option<PixelCredential>> {
        let row = sqlx::query_as::<_, (Option<String>, Option<String>, Option<String>, Option<String>, Option<i64>)>(
            r#"
            SELECT pixel_id, access_token, access_token_ciphertext, access_token_iv, access_token_version
            FROM account_pixels
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.map(super::pixel_from_parts))
    }

    async fn upsert_account_pixel(&self, owner_id: &str, pixel: &PixelCredential) -> Result<()> {
        let now = unix_now()?;
        let (ciphertext, iv, version) = secret_parts(pixel);

        sqlx::query(
            r#"
            INSERT INTO account_pixels (
                owner_id, pixel_id, access_token, access_token_ciphertext,
                access_token_iv, access_token_version, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (owner_id) DO UPDATE SET
                pixel_id = EXCLUDED.pixel_id,
                access_token = EXCLUDED.access_token,
                access_token_ciphertext = EXCLUDED.access_token_ciphertext,
                access_token_iv = EXCLUDED.access_token_iv,
                access_token_version = EXCLUDED.access_token_version,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(owner_id)
        .bind(pixel.pixel_id.as_deref())
        .bind(pixel.access_token.as_deref())
        .bind(ciphertext)
        .bind(iv)
        .bind(version)
        .bind(now)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn insert_scan(&self, scan: &NewScan) -> Result<bool> {
        let bucket = scan.bucket();
        let (mobile, tablet, desktop) = scan.device_increments();

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO scans (
                campaign_id, visitor_id, ip_hash, locality, city, postcode, state, state_code,
                country, country_code, latitude, longitude, confidence_km, geo_source, isp,
                network_type, connection_type, is_vpn, is_proxy, is_tor, device_type, browser,
                browser_version, os, os_version, referrer, screen_width, screen_height,
                is_first_scan, event_id, scanned_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31
            )
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(scan.campaign_id)
        .bind(&scan.visitor_id)
        .bind(scan.ip_hash.as_deref())
        .bind(scan.locality.as_deref())
        .bind(scan.city.as_deref())
        .bind(scan.postcode.as_deref())
        .bind(scan.state.as_deref())
        .bind(scan.state_code.as_deref())
        .bind(scan.country.as_deref())
        .bind(scan.country_code.as_deref())
        .bind(scan.latitude)
        .bind(scan.longitude)
        .bind(scan.confidence_km)
        .bind(&scan.geo_source)
        .bind(scan.isp.as_deref())
        .bind(scan.network_type.as_deref())
        .bind(scan.connection_type.as_deref())
        .bind(scan.is_vpn)
        .bind(scan.is_proxy)
        .bind(scan.is_tor)
        .bind(&scan.device_type)
        .bind(scan.browser.as_deref())
        .bind(scan.browser_version.as_deref())
        .bind(scan.os.as_deref())
        .bind(scan.os_version.as_deref())
        .bind(scan.referrer.as_deref())
        .bind(scan.screen_width)
        .bind(scan.screen_height)
        .bind(scan.is_first_scan)
        .bind(&scan.event_id)
        .bind(scan.scanned_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        // Row-level lock on the bucket serialises concurrent increments
        sqlx::query(
            r#"
            INSERT INTO scan_aggregates (
                campaign_id, scan_date, scan_hour, locality, postcode, state,
                total_scans, unique_visitors, mobile_scans, tablet_scans, desktop_scans
            )
            VALUES ($1, $2, $3, $4, $5, $6, 1, $7, $8, $9, $10)
            ON CONFLICT (campaign_id, scan_date, scan_hour, locality, postcode, state) DO UPDATE SET
                total_scans = scan_aggregates.total_scans + EXCLUDED.total_scans,
                unique_visitors = scan_aggregates.unique_visitors + EXCLUDED.unique_visitors,
                mobile_scans = scan_aggregates.mobile_scans + EXCLUDED.mobile_scans,
                tablet_scans = scan_aggregates.tablet_scans + EXCLUDED.tablet_scans,
                desktop_scans = scan_aggregates.desktop_scans + EXCLUDED.desktop_scans
            "#,
        )
        .bind(bucket.campaign_id)
        .bind(&bucket.scan_date)
        .bind(bucket.scan_hour)
        .bind(&bucket.locality)
        .bind(&bucket.postcode)
        .bind(&bucket.state)
        .bind(i64::from(scan.is_first_scan))
        .bind(mobile)
        .bind(tablet)
        .bind(desktop)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(true)
    }

    async fn get_aggregates(&self, campaign_id: i64) -> Result<Vec<ScanAggregate>> {
        let rows = sqlx::query_as::<_, ScanAggregate>(
            r#"
            SELECT campaign_id, scan_date, scan_hour, locality, postcode, state,
                   total_scans, unique_visitors, mobile_scans, tablet_scans, desktop_scans
            FROM scan_aggregates
            WHERE campaign_id = $1
            ORDER BY scan_date DESC, scan_hour DESC, total_scans DESC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows)
    }

    async fn list_scans(&self, campaign_id: i64, limit: i64) -> Result<Vec<ScanRecord>> {
        let sql = format!(
            r#"
            SELECT {SCAN_COLUMNS}
            FROM scans
            WHERE campaign_id = $1
            ORDER BY scanned_at DESC, id DESC
            LIMIT $2
            "#
        );

        let rows = sqlx::query_as::<_, ScanRecord>(&sql)
            .bind(campaign_id)
            .bind(limit)
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(rows)
    }
}
