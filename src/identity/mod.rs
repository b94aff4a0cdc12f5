//! Visitor identity and tracking cookies
//!
//! A visitor is nothing more than a random id in a first-party cookie.
//! "First scan" of a campaign is decided by the absence of that campaign's
//! visit marker, never by a database lookup.

use chrono::{DateTime, Duration, Utc};
use cookie::time::OffsetDateTime;
use cookie::{Cookie, SameSite};

pub const VISITOR_COOKIE: &str = "sl_vid";
pub const CAMPAIGN_COOKIE_PREFIX: &str = "sl_cv_";
pub const EVENT_COOKIE: &str = "sl_eid";
/// Ad-platform click id and browser id cookies, forwarded verbatim
pub const CLICK_ID_COOKIE: &str = "_fbc";
pub const BROWSER_ID_COOKIE: &str = "_fbp";

/// Visitor ids shorter than this are treated as tampered or legacy
pub const MIN_VISITOR_ID_LEN: usize = 16;
/// The dedup marker only correlates requests of one visit
pub const EVENT_COOKIE_DAYS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorIdentity {
    pub visitor_id: String,
    pub is_new: bool,
}

/// Value of cookie `name` in a raw `Cookie` request header
pub fn cookie_value(cookie_header: Option<&str>, name: &str) -> Option<String> {
    cookie_header?
        .split(';')
        .filter_map(|pair| Cookie::parse(pair.trim()).ok())
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
}

pub fn campaign_cookie_name(campaign_id: i64) -> String {
    format!("{CAMPAIGN_COOKIE_PREFIX}{campaign_id}")
}

fn generate_visitor_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

fn is_valid_visitor_id(value: &str) -> bool {
    value.len() >= MIN_VISITOR_ID_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Reuse the visitor cookie when it is well-formed, otherwise mint a new id
pub fn resolve_visitor(cookie_header: Option<&str>) -> VisitorIdentity {
    match cookie_value(cookie_header, VISITOR_COOKIE) {
        Some(existing) if is_valid_visitor_id(&existing) => VisitorIdentity {
            visitor_id: existing,
            is_new: false,
        },
        _ => VisitorIdentity {
            visitor_id: generate_visitor_id(),
            is_new: true,
        },
    }
}

pub fn has_visited_campaign(cookie_header: Option<&str>, campaign_id: i64) -> bool {
    campaign_marker(cookie_header, campaign_id).is_some()
}

/// Value of the campaign-visit marker: the event id of the visit that set it
pub fn campaign_marker(cookie_header: Option<&str>, campaign_id: i64) -> Option<String> {
    cookie_value(cookie_header, &campaign_cookie_name(campaign_id)).filter(|v| !v.is_empty())
}

/// A scan is the first for this campaign when no marker exists yet, or when
/// the marker was minted by this very event (the bridge follow-up request
/// arrives after the bridge redirect already set it).
pub fn is_first_scan(cookie_header: Option<&str>, campaign_id: i64, event_id: &str) -> bool {
    match campaign_marker(cookie_header, campaign_id) {
        None => true,
        Some(marker) => marker == event_id,
    }
}

pub fn cookie_expiry(duration_days: i64) -> DateTime<Utc> {
    Utc::now() + Duration::days(duration_days)
}

fn to_offset(at: DateTime<Utc>) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(at.timestamp()).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

fn tracking_cookie(name: String, value: String, expires: DateTime<Utc>) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .same_site(SameSite::Lax)
        .secure(true)
        .expires(to_offset(expires))
        .build()
}

/// The three tracking cookies of a served scan: visitor identity and campaign
/// marker (both living `expiry`), plus the short-lived dedup event marker.
///
/// `marker` is the existing campaign marker value, kept so the marker keeps
/// naming the visit that first set it.
pub fn build_cookies(
    visitor_id: &str,
    campaign_id: i64,
    event_id: &str,
    marker: Option<&str>,
    expiry: DateTime<Utc>,
) -> Vec<Cookie<'static>> {
    vec![
        tracking_cookie(VISITOR_COOKIE.to_string(), visitor_id.to_string(), expiry),
        tracking_cookie(
            campaign_cookie_name(campaign_id),
            marker.unwrap_or(event_id).to_string(),
            expiry,
        ),
        tracking_cookie(
            EVENT_COOKIE.to_string(),
            event_id.to_string(),
            cookie_expiry(EVENT_COOKIE_DAYS),
        ),
    ]
}
