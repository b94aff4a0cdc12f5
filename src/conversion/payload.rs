//! Server-side conversion event body
//!
//! Field names follow the Graph API conversions endpoint. Location fields and
//! the visitor id are normalised then SHA-256 hashed; client IP and user agent
//! go out raw because the platform matches on them itself.

use serde::Serialize;
use std::net::IpAddr;

use crate::device::DeviceType;
use crate::geo::GeoResult;
use crate::models::Campaign;
use crate::privacy::sha256_hex;

/// Per-visit facts the event is built from
#[derive(Debug, Clone)]
pub struct VisitorContext {
    pub visitor_id: String,
    pub event_id: String,
    pub client_ip: IpAddr,
    pub user_agent: String,
    pub source_url: String,
    /// `_fbc` click-id cookie, forwarded verbatim
    pub click_id: Option<String>,
    /// `_fbp` browser-id cookie, forwarded verbatim
    pub browser_id: Option<String>,
    pub device_type: DeviceType,
    pub is_first_scan: bool,
    pub event_time: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionPayload {
    pub data: Vec<ConversionEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_event_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversionEvent {
    pub event_name: String,
    pub event_time: i64,
    pub event_id: String,
    pub event_source_url: String,
    pub action_source: &'static str,
    pub user_data: UserData,
    pub custom_data: CustomData,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserData {
    pub client_ip_address: String,
    pub client_user_agent: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub external_id: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ct: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub zp: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub st: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub country: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fbc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fbp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomData {
    pub campaign_id: i64,
    pub campaign_name: String,
    pub short_code: String,
    pub is_first_scan: bool,
    pub device_type: &'static str,
    pub geo_source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_km: Option<f64>,
    /// VPN, proxy or Tor traffic. Still sent, left to the platform to filter.
    pub traffic_flagged: bool,
}

/// Lowercase and keep only letters and digits
fn normalize_alnum(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn hashed(value: Option<&str>) -> Vec<String> {
    value
        .map(normalize_alnum)
        .filter(|v| !v.is_empty())
        .map(|v| vec![sha256_hex(&v)])
        .unwrap_or_default()
}

impl UserData {
    pub fn build(geo: &GeoResult, visitor: &VisitorContext) -> Self {
        // State matches best as its short code when we have one
        let state = geo.state_code.as_deref().or(geo.state.as_deref());

        Self {
            client_ip_address: visitor.client_ip.to_string(),
            client_user_agent: visitor.user_agent.clone(),
            external_id: vec![sha256_hex(visitor.visitor_id.trim())],
            ct: hashed(geo.city.as_deref().or(geo.locality.as_deref())),
            zp: hashed(geo.postcode.as_deref()),
            st: hashed(state),
            country: hashed(geo.country_code.as_deref()),
            fbc: visitor.click_id.clone(),
            fbp: visitor.browser_id.clone(),
        }
    }
}

impl ConversionPayload {
    pub fn build(
        event_name: &str,
        campaign: &Campaign,
        geo: &GeoResult,
        visitor: &VisitorContext,
        test_event_code: Option<&str>,
    ) -> Self {
        let event = ConversionEvent {
            event_name: event_name.to_string(),
            event_time: visitor.event_time,
            event_id: visitor.event_id.clone(),
            event_source_url: visitor.source_url.clone(),
            action_source: "website",
            user_data: UserData::build(geo, visitor),
            custom_data: CustomData {
                campaign_id: campaign.id,
                campaign_name: campaign.name.clone(),
                short_code: campaign.short_code.clone(),
                is_first_scan: visitor.is_first_scan,
                device_type: visitor.device_type.as_str(),
                geo_source: geo.source.as_str(),
                locality: geo.location_label().map(str::to_string),
                confidence_km: geo.confidence_km,
                traffic_flagged: geo.is_anonymized(),
            },
        };

        Self {
            data: vec![event],
            test_event_code: test_event_code.map(str::to_string),
        }
    }

    pub fn event_id(&self) -> Option<&str> {
        self.data.first().map(|event| event.event_id.as_str())
    }
}
