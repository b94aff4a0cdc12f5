use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::app::AppState;
use crate::device::classify;
use crate::geo::{extract_client_ip, merge, ConfidenceLevel, GeoResult, GeoSource};
use crate::identity::{cookie_value, is_first_scan, resolve_visitor, EVENT_COOKIE};
use crate::models::Campaign;
use crate::privacy::{generate_event_id, is_event_id};
use crate::tracking::{correlation_cookies, header_str, ScanContext};

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn not_found() -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "Campaign not found".to_string(),
        }),
    )
}

/// Active campaign or a 404. Lookup errors are logged and look like a miss.
async fn active_campaign(state: &AppState, code: &str) -> Result<Campaign, ApiError> {
    match state.storage.find_active_campaign(code).await {
        Ok(Some(campaign)) => Ok(campaign),
        Ok(None) => Err(not_found()),
        Err(e) => {
            warn!(short_code = %code, "campaign lookup failed: {e:#}");
            Err(not_found())
        }
    }
}

/// What the bridge page shows and where it goes next
#[derive(Debug, Serialize, Deserialize)]
pub struct CampaignDisplay {
    pub name: String,
    pub destination_url: String,
    pub bridge_duration_ms: u64,
    /// Pixel for the client-side companion event, if one is configured
    pub pixel_id: Option<String>,
    pub event_name: String,
}

pub async fn campaign_display(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<CampaignDisplay>, ApiError> {
    let campaign = active_campaign(&state, &code).await?;

    let pixel_id = match campaign.pixel.pixel_id.clone().filter(|_| campaign.pixel.has_pixel()) {
        Some(pixel_id) => Some(pixel_id),
        None => state
            .tracker
            .account_pixel(&campaign)
            .await
            .and_then(|pixel| pixel.pixel_id),
    };

    Ok(Json(CampaignDisplay {
        name: campaign.name,
        destination_url: campaign.destination_url,
        bridge_duration_ms: campaign.bridge_duration_ms,
        pixel_id,
        event_name: state.tracker.event_name().to_string(),
    }))
}

/// Body posted by the bridge page. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TrackRequest {
    pub event_id: Option<String>,
    pub screen_width: Option<i64>,
    pub screen_height: Option<i64>,
    pub page_url: Option<String>,
    pub referrer: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeoSummary {
    pub locality: Option<String>,
    pub postcode: Option<String>,
    pub state: Option<String>,
    pub country_code: Option<String>,
    pub confidence_km: Option<f64>,
    pub confidence_level: ConfidenceLevel,
    pub source: GeoSource,
}

impl From<&GeoResult> for GeoSummary {
    fn from(geo: &GeoResult) -> Self {
        Self {
            locality: geo.location_label().map(str::to_string),
            postcode: geo.postcode.clone(),
            state: geo.state.clone(),
            country_code: geo.country_code.clone(),
            confidence_km: geo.confidence_km,
            confidence_level: geo.confidence_level(),
            source: geo.source,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrackResponse {
    pub tracked: bool,
    pub event_id: Option<String>,
    pub geo: Option<GeoSummary>,
}

fn clamp_screen(value: Option<i64>) -> Option<i64> {
    value.filter(|v| (1..=20_000).contains(v))
}

/// Precision tracking for a bridge visit.
///
/// Runs the same enrichment as a direct scan. The response waits for the
/// location at most the campaign's bridge duration; enrichment continues in
/// the background either way.
pub async fn track_scan(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TrackResponse>, ApiError> {
    let campaign = active_campaign(&state, &code).await?;

    let user_agent = header_str(&headers, header::USER_AGENT).unwrap_or_default();
    let device = classify(user_agent);
    if device.is_bot {
        return Ok(Json(TrackResponse {
            tracked: false,
            event_id: None,
            geo: None,
        }));
    }

    // sendBeacon posts text/plain, so the body is parsed by hand
    let request: TrackRequest = if body.is_empty() {
        TrackRequest::default()
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|e| {
            debug!("ignoring malformed track body: {e}");
            TrackRequest::default()
        })
    };

    let cookie_header = header_str(&headers, header::COOKIE);
    let event_id = request
        .event_id
        .filter(|eid| is_event_id(eid))
        .or_else(|| cookie_value(cookie_header, EVENT_COOKIE).filter(|eid| is_event_id(eid)))
        .unwrap_or_else(generate_event_id);

    let visitor = resolve_visitor(cookie_header);
    let client_ip = extract_client_ip(&headers, addr.ip(), &state.client_ip);
    let (click_id, browser_id) = correlation_cookies(&headers);
    let fallback_geo = state.tracker.geo().fallback(&headers, client_ip);
    let deadline = Duration::from_millis(campaign.bridge_duration_ms);

    let source_url = request.page_url.filter(|url| !url.is_empty()).unwrap_or_else(|| {
        format!(
            "{}{}/{}",
            state.redirect.public_base_url.as_deref().unwrap_or(""),
            state.redirect.redirect_prefix,
            code
        )
    });

    let ctx = ScanContext {
        is_first_scan: is_first_scan(cookie_header, campaign.id, &event_id),
        visitor_id: visitor.visitor_id,
        event_id: event_id.clone(),
        client_ip,
        user_agent: user_agent.to_string(),
        device,
        referrer: request
            .referrer
            .or_else(|| header_str(&headers, header::REFERER).map(str::to_string)),
        source_url,
        click_id,
        browser_id,
        fallback_geo: fallback_geo.clone(),
        screen_width: clamp_screen(request.screen_width),
        screen_height: clamp_screen(request.screen_height),
        scanned_at: chrono::Utc::now().timestamp(),
        campaign,
    };

    let geo = match tokio::time::timeout(deadline, state.tracker.spawn(ctx)).await {
        Ok(Ok(geo)) => geo,
        _ => {
            debug!(%event_id, "location not ready before bridge deadline");
            merge(GeoResult::empty(), fallback_geo)
        }
    };

    Ok(Json(TrackResponse {
        tracked: true,
        event_id: Some(event_id),
        geo: Some(GeoSummary::from(&geo)),
    }))
}
