use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Enriched visit ready to be appended to the scans table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewScan {
    pub campaign_id: i64,
    pub visitor_id: String,
    pub ip_hash: Option<String>,
    pub locality: Option<String>,
    pub city: Option<String>,
    pub postcode: Option<String>,
    pub state: Option<String>,
    pub state_code: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub confidence_km: Option<f64>,
    pub geo_source: String,
    pub isp: Option<String>,
    pub network_type: Option<String>,
    pub connection_type: Option<String>,
    pub is_vpn: bool,
    pub is_proxy: bool,
    pub is_tor: bool,
    pub device_type: String,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub referrer: Option<String>,
    pub screen_width: Option<i64>,
    pub screen_height: Option<i64>,
    pub is_first_scan: bool,
    pub event_id: String,
    /// Unix timestamp (seconds)
    pub scanned_at: i64,
}

impl NewScan {
    /// Rollup bucket this scan increments
    pub fn bucket(&self) -> AggregateBucket {
        let at = DateTime::<Utc>::from_timestamp(self.scanned_at, 0).unwrap_or_default();

        AggregateBucket {
            campaign_id: self.campaign_id,
            scan_date: at.format("%Y-%m-%d").to_string(),
            scan_hour: at.hour() as i64,
            locality: self.locality.clone().unwrap_or_default(),
            postcode: self.postcode.clone().unwrap_or_default(),
            state: self.state.clone().unwrap_or_default(),
        }
    }

    /// Counter increments as (mobile, tablet, desktop); exactly one is 1
    pub fn device_increments(&self) -> (i64, i64, i64) {
        match self.device_type.as_str() {
            "mobile" => (1, 0, 0),
            "tablet" => (0, 1, 0),
            _ => (0, 0, 1),
        }
    }
}

/// Key of a ScanAggregate row. Missing geo parts are stored as empty strings so
/// the composite key stays comparable in both SQLite and Postgres.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct AggregateBucket {
    pub campaign_id: i64,
    pub scan_date: String,
    pub scan_hour: i64,
    pub locality: String,
    pub postcode: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScanRecord {
    pub id: i64,
    pub campaign_id: i64,
    pub visitor_id: String,
    pub ip_hash: Option<String>,
    pub locality: Option<String>,
    pub city: Option<String>,
    pub postcode: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub confidence_km: Option<f64>,
    pub geo_source: String,
    pub is_vpn: bool,
    pub is_proxy: bool,
    pub is_tor: bool,
    pub device_type: String,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub referrer: Option<String>,
    pub is_first_scan: bool,
    pub event_id: String,
    pub scanned_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScanAggregate {
    pub campaign_id: i64,
    pub scan_date: String,
    pub scan_hour: i64,
    pub locality: String,
    pub postcode: String,
    pub state: String,
    pub total_scans: i64,
    pub unique_visitors: i64,
    pub mobile_scans: i64,
    pub tablet_scans: i64,
    pub desktop_scans: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_from_timestamp() {
        let scan = NewScan {
            campaign_id: 3,
            // 2024-03-05 14:25:00 UTC
            scanned_at: 1_709_648_700,
            locality: Some("Bondi".to_string()),
            postcode: Some("2026".to_string()),
            device_type: "tablet".to_string(),
            ..Default::default()
        };

        let bucket = scan.bucket();
        assert_eq!(bucket.scan_date, "2024-03-05");
        assert_eq!(bucket.scan_hour, 14);
        assert_eq!(bucket.locality, "Bondi");
        assert_eq!(bucket.state, "");
        assert_eq!(scan.device_increments(), (0, 1, 0));
    }

    #[test]
    fn test_unknown_device_counts_as_desktop() {
        let scan = NewScan {
            device_type: String::new(),
            ..Default::default()
        };
        assert_eq!(scan.device_increments(), (0, 0, 1));
    }
}
