use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use cookie::Cookie;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use super::bridge::{render_bridge, BridgeConfig};
use super::middleware::RequestStart;
use super::orchestrator::{decide, RedirectDecision};
use crate::app::AppState;
use crate::device::classify;
use crate::geo::extract_client_ip;
use crate::identity::{build_cookies, campaign_marker, cookie_expiry, is_first_scan, resolve_visitor};
use crate::privacy::is_event_id;
use crate::tracking::{correlation_cookies, header_str, ScanContext};

pub const TIMING_HEADER: &str = "x-scanlink-timing-ms";

/// Redirect response with `Cache-Control: no-store` so every scan reaches us
fn redirect_response(
    status: StatusCode,
    location: &str,
    cookies: &[Cookie<'static>],
    request_start: RequestStart,
) -> Response {
    let Ok(location) = HeaderValue::from_str(location) else {
        warn!(location, "redirect target is not a valid header value");
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };

    let mut response = status.into_response();
    let headers = response.headers_mut();
    headers.insert(header::LOCATION, location);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    for cookie in cookies {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                headers.append(header::SET_COOKIE, value);
            }
            Err(_) => warn!(cookie = cookie.name(), "dropping unencodable cookie"),
        }
    }

    if let Ok(value) = HeaderValue::from_str(&request_start.elapsed_ms().to_string()) {
        headers.insert(TIMING_HEADER, value);
    }

    response
}

/// Absolute URL of this request, used as the conversion event source
fn request_url(state: &AppState, headers: &HeaderMap, path: &str) -> String {
    match (&state.redirect.public_base_url, header_str(headers, header::HOST)) {
        (Some(base), _) => format!("{base}{path}"),
        (None, Some(host)) => format!("https://{host}{path}"),
        (None, None) => path.to_string(),
    }
}

/// QR entry point: resolve the code and redirect, bridge or direct
pub async fn redirect_scan(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Extension(request_start): Extension<RequestStart>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    // The only blocking step. A failed lookup degrades to not-found.
    let campaign = match state.storage.find_active_campaign(&code).await {
        Ok(campaign) => campaign,
        Err(e) => {
            warn!(short_code = %code, "campaign lookup failed: {e:#}");
            None
        }
    };

    let user_agent = header_str(&headers, header::USER_AGENT).unwrap_or_default();
    let decision = decide(campaign, user_agent);
    debug!(short_code = %code, decision = decision.as_str(), "scan");

    let (campaign, event_id, bridged) = match decision {
        RedirectDecision::NotFound => {
            return redirect_response(StatusCode::FOUND, &state.redirect.default_url, &[], request_start);
        }
        RedirectDecision::BotShortCircuit { destination } => {
            return redirect_response(StatusCode::FOUND, &destination, &[], request_start);
        }
        RedirectDecision::Bridge { campaign, event_id } => (campaign, event_id, true),
        RedirectDecision::Direct { campaign, event_id } => (campaign, event_id, false),
    };

    let cookie_header = header_str(&headers, header::COOKIE);
    let visitor = resolve_visitor(cookie_header);
    let marker = campaign_marker(cookie_header, campaign.id);
    let cookies = build_cookies(
        &visitor.visitor_id,
        campaign.id,
        &event_id,
        marker.as_deref(),
        cookie_expiry(campaign.cookie_duration.days()),
    );

    if bridged {
        // Enrichment happens on the bridge page's follow-up request
        let location = state.redirect.bridge_location(&code, &event_id);
        return redirect_response(StatusCode::TEMPORARY_REDIRECT, &location, &cookies, request_start);
    }

    let client_ip = extract_client_ip(&headers, addr.ip(), &state.client_ip);
    let (click_id, browser_id) = correlation_cookies(&headers);
    let path = format!("{}/{}", state.redirect.redirect_prefix, code);

    let ctx = ScanContext {
        is_first_scan: is_first_scan(cookie_header, campaign.id, &event_id),
        visitor_id: visitor.visitor_id,
        event_id,
        client_ip,
        user_agent: user_agent.to_string(),
        device: classify(user_agent),
        referrer: header_str(&headers, header::REFERER).map(str::to_string),
        source_url: request_url(&state, &headers, &path),
        click_id,
        browser_id,
        fallback_geo: state.tracker.geo().fallback(&headers, client_ip),
        screen_width: None,
        screen_height: None,
        scanned_at: chrono::Utc::now().timestamp(),
        campaign,
    };

    let destination = ctx.campaign.destination_url.clone();
    // Detached; the response never waits on geolocation, dispatch or recording
    let _ = state.tracker.spawn(ctx);

    redirect_response(StatusCode::FOUND, &destination, &cookies, request_start)
}

#[derive(Debug, Deserialize)]
pub struct BridgeQuery {
    pub eid: Option<String>,
}

/// Bridge page. Unknown codes and missing event ids go to the default page.
pub async fn bridge_page(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(query): Query<BridgeQuery>,
    Extension(request_start): Extension<RequestStart>,
) -> Response {
    let Some(event_id) = query.eid.filter(|eid| is_event_id(eid)) else {
        return redirect_response(StatusCode::FOUND, &state.redirect.default_url, &[], request_start);
    };

    let api_base = format!("{}/{}", state.redirect.api_prefix, urlencoding::encode(&code));
    render_bridge(&BridgeConfig {
        api_base: &api_base,
        event_id: &event_id,
        default_url: &state.redirect.default_url,
    })
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}
