use crate::models::{
    Campaign, CampaignRow, CampaignStatus, NewCampaign, NewScan, PixelCredential, ScanAggregate,
    ScanRecord,
};
use crate::privacy::EncryptedSecret;
use crate::storage::trait_def::{unix_now, CAMPAIGN_COLUMNS, SCAN_COLUMNS};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        // WAL plus a busy timeout lets concurrent scan inserts queue on the
        // write lock instead of failing with SQLITE_BUSY
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

fn secret_parts(pixel: &PixelCredential) -> (Option<&str>, Option<&str>, Option<i64>) {
    match &pixel.access_token_encrypted {
        Some(EncryptedSecret {
            ciphertext,
            iv,
            version,
        }) => (Some(ciphertext.as_str()), Some(iv.as_str()), Some(*version as i64)),
        None => (None, None, None),
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS campaigns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id TEXT,
                name TEXT NOT NULL,
                short_code TEXT NOT NULL,
                slug TEXT,
                destination_url TEXT NOT NULL,
                cookie_duration_days INTEGER NOT NULL DEFAULT 30,
                bridge_enabled INTEGER NOT NULL DEFAULT 0,
                bridge_duration_ms INTEGER,
                status TEXT NOT NULL DEFAULT 'active',
                pixel_id TEXT,
                access_token TEXT,
                access_token_ciphertext TEXT,
                access_token_iv TEXT,
                access_token_version INTEGER,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        // One active owner per code or slug; paused and archived rows may repeat
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
            r#"
            CREATE TABLE IF NOT EXISTS account_pixels (
                owner_id TEXT PRIMARY KEY,
                pixel_id TEXT,
                access_token TEXT,
                access_token_ciphertext TEXT,
                access_token_iv TEXT,
                access_token_version INTEGER,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                campaign_id INTEGER NOT NULL,
                visitor_id TEXT NOT NULL,
                ip_hash TEXT,
                locality TEXT,
                city TEXT,
                postcode TEXT,
                state TEXT,
                state_code TEXT,
                country TEXT,
                country_code TEXT,
                latitude REAL,
                longitude REAL,
                confidence_km REAL,
                geo_source TEXT NOT NULL,
                isp TEXT,
                network_type TEXT,
                connection_type TEXT,
                is_vpn INTEGER NOT NULL DEFAULT 0,
                is_proxy INTEGER NOT NULL DEFAULT 0,
                is_tor INTEGER NOT NULL DEFAULT 0,
                device_type TEXT NOT NULL,
                browser TEXT,
                browser_version TEXT,
                os TEXT,
                os_version TEXT,
                referrer TEXT,
                screen_width INTEGER,
                screen_height INTEGER,
                is_first_scan INTEGER NOT NULL DEFAULT 0,
                event_id TEXT NOT NULL UNIQUE,
                scanned_at INTEGER NOT NULL
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
                campaign_id INTEGER NOT NULL,
                scan_date TEXT NOT NULL,
                scan_hour INTEGER NOT NULL,
                locality TEXT NOT NULL DEFAULT '',
                postcode TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL DEFAULT '',
                total_scans INTEGER NOT NULL DEFAULT 0,
                unique_visitors INTEGER NOT NULL DEFAULT 0,
                mobile_scans INTEGER NOT NULL DEFAULT 0,
                tablet_scans INTEGER NOT NULL DEFAULT 0,
                desktop_scans INTEGER NOT NULL DEFAULT 0,
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

        // Insert first so the transaction holds the write lock before it
        // reads; the partial indexes reject code/code and slug/slug clashes
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            INSERT INTO campaigns (
                owner_id, name, short_code, slug, destination_url, cookie_duration_days,
                bridge_enabled, bridge_duration_ms, status, pixel_id, access_token,
                access_token_ciphertext, access_token_iv, access_token_version, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'active', ?, ?, ?, ?, ?, ?)
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

        // A new code colliding with an existing slug, or the reverse
        let taken: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM campaigns
            WHERE status = 'active'
              AND id != ?3
              AND (short_code IN (?1, ?2) OR slug IN (?1, ?2))
            "#,
        )
        .bind(&campaign.short_code)
        .bind(slug_or_code)
        .bind(row.id)
        .fetch_one(&mut *tx)
        .await?;

        if taken > 0 {
            tx.rollback().await?;
            return Err(StorageError::Conflict);
        }

        tx.commit().await?;

        Ok(row.into_campaign())
    }

    async fn set_campaign_status(&self, short_code: &str, status: CampaignStatus) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = ?
            WHERE id = (
                SELECT id FROM campaigns
                WHERE short_code = ? AND status != 'archived'
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
            WHERE status = 'active' AND (short_code = ?1 OR slug = ?1)
            ORDER BY (short_code = ?1) DESC
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
            WHERE status = 'active' AND (LOWER(short_code) = ?1 OR LOWER(slug) = ?1)
            ORDER BY (LOWER(short_code) = ?1) DESC, id
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
            WHERE owner_id = ?
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
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (owner_id) DO UPDATE SET
                pixel_id = excluded.pixel_id,
                access_token = excluded.access_token,
                access_token_ciphertext = excluded.access_token_ciphertext,
                access_token_iv = excluded.access_token_iv,
                access_token_version = excluded.access_token_version,
                updated_at = excluded.updated_at
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

        // The scan insert comes first so the transaction takes the write
        // lock immediately and waits on busy_timeout under contention
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
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
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

        sqlx::query(
            r#"
            INSERT INTO scan_aggregates (
                campaign_id, scan_date, scan_hour, locality, postcode, state,
                total_scans, unique_visitors, mobile_scans, tablet_scans, desktop_scans
            )
            VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)
            ON CONFLICT (campaign_id, scan_date, scan_hour, locality, postcode, state) DO UPDATE SET
                total_scans = scan_aggregates.total_scans + excluded.total_scans,
                unique_visitors = scan_aggregates.unique_visitors + excluded.unique_visitors,
                mobile_scans = scan_aggregates.mobile_scans + excluded.mobile_scans,
                tablet_scans = scan_aggregates.tablet_scans + excluded.tablet_scans,
                desktop_scans = scan_aggregates.desktop_scans + excluded.desktop_scans
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
            WHERE campaign_id = ?
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
            WHERE campaign_id = ?
            ORDER BY scanned_at DESC, id DESC
            LIMIT ?
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CookieDuration;

    async fn storage() -> SqliteStorage {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        storage
    }

    fn scan(campaign_id: i64, event_id: &str) -> NewScan {
        NewScan {
            campaign_id,
            visitor_id: "visitor-0000000001".to_string(),
            locality: Some("Bondi".to_string()),
            postcode: Some("2026".to_string()),
            state: Some("New South Wales".to_string()),
            geo_source: "primary".to_string(),
            device_type: "mobile".to_string(),
            is_first_scan: true,
            event_id: event_id.to_string(),
            scanned_at: 1_700_000_000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_find_campaign() {
        let storage = storage().await;
        let mut new = NewCampaign::new("AbC123", "https://example.com/landing");
        new.slug = Some("spring-sale".to_string());
        new.cookie_duration = CookieDuration::NinetyDays;
        let created = storage.create_campaign(&new).await.unwrap();

        let exact = storage.find_active_campaign("AbC123").await.unwrap().unwrap();
        assert_eq!(exact.id, created.id);
        assert_eq!(exact.cookie_duration, CookieDuration::NinetyDays);

        let folded = storage.find_active_campaign("ABC123").await.unwrap().unwrap();
        assert_eq!(folded.id, created.id);

        let by_slug = storage.find_active_campaign("Spring-Sale").await.unwrap().unwrap();
        assert_eq!(by_slug.id, created.id);

        assert!(storage.find_active_campaign("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_exact_case_wins_over_folded() {
        let storage = storage().await;
        let lower = storage
            .create_campaign(&NewCampaign::new("abc", "https://example.com/lower"))
            .await
            .unwrap();
        let upper = storage
            .create_campaign(&NewCampaign::new("ABC", "https://example.com/upper"))
            .await
            .unwrap();

        assert_eq!(storage.find_active_campaign("ABC").await.unwrap().unwrap().id, upper.id);
        assert_eq!(storage.find_active_campaign("abc").await.unwrap().unwrap().id, lower.id);
    }

    #[tokio::test]
    async fn test_active_code_is_unique() {
        let storage = storage().await;
        storage
            .create_campaign(&NewCampaign::new("dup", "https://example.com/a"))
            .await
            .unwrap();

        let again = storage
            .create_campaign(&NewCampaign::new("dup", "https://example.com/b"))
            .await;
        assert!(matches!(again, Err(StorageError::Conflict)));

        // Slug colliding with another campaign's code
        let mut slugged = NewCampaign::new("other", "https://example.com/c");
        slugged.slug = Some("dup".to_string());
        assert!(matches!(
            storage.create_campaign(&slugged).await,
            Err(StorageError::Conflict)
        ));

        // Once paused the code can be reissued
        assert!(storage.set_campaign_status("dup", CampaignStatus::Paused).await.unwrap());
        storage
            .create_campaign(&NewCampaign::new("dup", "https://example.com/d"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_paused_campaign_not_found() {
        let storage = storage().await;
        storage
            .create_campaign(&NewCampaign::new("paused1", "https://example.com/"))
            .await
            .unwrap();
        storage
            .set_campaign_status("paused1", CampaignStatus::Paused)
            .await
            .unwrap();

        assert!(storage.find_active_campaign("paused1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_scan_updates_aggregate() {
        let storage = storage().await;
        let campaign = storage
            .create_campaign(&NewCampaign::new("agg", "https://example.com/"))
            .await
            .unwrap();

        assert!(storage.insert_scan(&scan(campaign.id, "e1")).await.unwrap());
        let mut repeat = scan(campaign.id, "e2");
        repeat.is_first_scan = false;
        repeat.device_type = "tablet".to_string();
        assert!(storage.insert_scan(&repeat).await.unwrap());

        let aggregates = storage.get_aggregates(campaign.id).await.unwrap();
        assert_eq!(aggregates.len(), 1);
        let bucket = &aggregates[0];
        assert_eq!(bucket.total_scans, 2);
        assert_eq!(bucket.unique_visitors, 1);
        assert_eq!(bucket.mobile_scans, 1);
        assert_eq!(bucket.tablet_scans, 1);
        assert_eq!(bucket.desktop_scans, 0);
        assert_eq!(bucket.locality, "Bondi");
    }

    #[tokio::test]
    async fn test_repeated_event_id_is_ignored() {
        let storage = storage().await;
        let campaign = storage
            .create_campaign(&NewCampaign::new("once", "https://example.com/"))
            .await
            .unwrap();

        assert!(storage.insert_scan(&scan(campaign.id, "same")).await.unwrap());
        assert!(!storage.insert_scan(&scan(campaign.id, "same")).await.unwrap());

        assert_eq!(storage.list_scans(campaign.id, 10).await.unwrap().len(), 1);
        assert_eq!(storage.get_aggregates(campaign.id).await.unwrap()[0].total_scans, 1);
    }

    #[tokio::test]
    async fn test_missing_geo_parts_share_bucket() {
        let storage = storage().await;
        let campaign = storage
            .create_campaign(&NewCampaign::new("nogeo", "https://example.com/"))
            .await
            .unwrap();

        for eid in ["a", "b"] {
            let mut s = scan(campaign.id, eid);
            s.locality = None;
            s.postcode = None;
            s.state = None;
            storage.insert_scan(&s).await.unwrap();
        }

        let aggregates = storage.get_aggregates(campaign.id).await.unwrap();
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].total_scans, 2);
        assert_eq!(aggregates[0].postcode, "");
    }

    #[tokio::test]
    async fn test_account_pixel_upsert() {
        let storage = storage().await;
        assert!(storage.get_account_pixel("owner").await.unwrap().is_none());

        let pixel = PixelCredential {
            pixel_id: Some("123".to_string()),
            access_token: None,
            access_token_encrypted: Some(EncryptedSecret {
                ciphertext: "Y2lwaGVy".to_string(),
                iv: "aXZpdml2aXZpdml2".to_string(),
                version: 1,
            }),
        };
        storage.upsert_account_pixel("owner", &pixel).await.unwrap();
        assert_eq!(storage.get_account_pixel("owner").await.unwrap(), Some(pixel));

        let replaced = PixelCredential {
            pixel_id: Some("456".to_string()),
            access_token: Some("plain".to_string()),
            access_token_encrypted: None,
        };
        storage.upsert_account_pixel("owner", &replaced).await.unwrap();
        assert_eq!(storage.get_account_pixel("owner").await.unwrap(), Some(replaced));
    }
}
