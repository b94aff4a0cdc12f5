//! Everything captured from one request that the background enrichment needs.
//!
//! Built on the request path before the response is sent, so nothing in the
//! background task borrows from the request.

use axum::http::{header, HeaderMap};
use std::net::IpAddr;

use crate::conversion::VisitorContext;
use crate::device::DeviceInfo;
use crate::geo::GeoResult;
use crate::identity::{cookie_value, BROWSER_ID_COOKIE, CLICK_ID_COOKIE};
use crate::models::{Campaign, NewScan};
use crate::privacy::IpHasher;

#[derive(Debug, Clone)]
pub struct ScanContext {
    pub campaign: Campaign,
    pub visitor_id: String,
    pub event_id: String,
    pub is_first_scan: bool,
    pub client_ip: IpAddr,
    pub user_agent: String,
    pub device: DeviceInfo,
    pub referrer: Option<String>,
    pub source_url: String,
    pub click_id: Option<String>,
    pub browser_id: Option<String>,
    /// Edge headers and local database, resolved on the request path
    pub fallback_geo: GeoResult,
    pub screen_width: Option<i64>,
    pub screen_height: Option<i64>,
    pub scanned_at: i64,
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Ad-platform correlation cookies, forwarded as-is: (click id, browser id)
pub fn correlation_cookies(headers: &HeaderMap) -> (Option<String>, Option<String>) {
    let cookies = header_str(headers, header::COOKIE);
    (
        cookie_value(cookies, CLICK_ID_COOKIE),
        cookie_value(cookies, BROWSER_ID_COOKIE),
    )
}

fn known(value: &str) -> Option<String> {
    (value != "Unknown").then(|| value.to_string())
}

impl ScanContext {
    pub fn visitor_context(&self) -> VisitorContext {
        VisitorContext {
            visitor_id: self.visitor_id.clone(),
            event_id: self.event_id.clone(),
            client_ip: self.client_ip,
            user_agent: self.user_agent.clone(),
            source_url: self.source_url.clone(),
            click_id: self.click_id.clone(),
            browser_id: self.browser_id.clone(),
            device_type: self.device.device_type,
            is_first_scan: self.is_first_scan,
            event_time: self.scanned_at,
        }
    }

    /// Scan row for this visit. The raw IP is reduced to its salted hash.
    pub fn new_scan(&self, geo: &GeoResult, hasher: &IpHasher) -> NewScan {
        NewScan {
            campaign_id: self.campaign.id,
            visitor_id: self.visitor_id.clone(),
            ip_hash: hasher.hash_ip(self.client_ip),
            locality: geo.locality.clone(),
            city: geo.city.clone(),
            postcode: geo.postcode.clone(),
            state: geo.state.clone(),
            state_code: geo.state_code.clone(),
            country: geo.country.clone(),
            country_code: geo.country_code.clone(),
            latitude: geo.latitude,
            longitude: geo.longitude,
            confidence_km: geo.confidence_km,
            geo_source: geo.source.as_str().to_string(),
            isp: geo.isp.clone(),
            network_type: geo.network_type.clone(),
            connection_type: geo.connection_type.clone(),
            is_vpn: geo.is_vpn,
            is_proxy: geo.is_proxy,
            is_tor: geo.is_tor,
            device_type: self.device.device_type.as_str().to_string(),
            browser: known(&self.device.browser),
            browser_version: self.device.browser_version.clone(),
            os: known(&self.device.os),
            os_version: self.device.os_version.clone(),
            referrer: self.referrer.clone(),
            screen_width: self.screen_width,
            screen_height: self.screen_height,
            is_first_scan: self.is_first_scan,
            event_id: self.event_id.clone(),
            scanned_at: self.scanned_at,
        }
    }
}
