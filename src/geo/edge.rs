//! Coarse location from edge-network request headers
//!
//! Hosting edges (Vercel, Cloudflare with visitor-location headers enabled)
//! geolocate the client before the request reaches us. The values are
//! city-level at best, so they only ever fill gaps in the precision result.

use axum::http::HeaderMap;

use super::models::{GeoResult, GeoSource};

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(name)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    // Vercel percent-encodes non-ASCII city names
    let decoded = urlencoding::decode(raw)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    Some(decoded)
}

fn first_header(headers: &HeaderMap, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| header(headers, name))
}

fn coordinate(headers: &HeaderMap, names: &[&str]) -> Option<f64> {
    first_header(headers, names)?.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Build the fallback result from edge headers; empty when none are present
pub fn from_edge_headers(headers: &HeaderMap) -> GeoResult {
    let city = first_header(headers, &["x-vercel-ip-city", "cf-ipcity"]);
    let country_code = first_header(headers, &["x-vercel-ip-country", "cf-ipcountry"])
        .map(|c| c.to_uppercase())
        // Cloudflare uses XX for unknown and T1 for Tor exit nodes
        .filter(|c| c != "XX" && c != "T1");
    let is_tor = header(headers, "cf-ipcountry").is_some_and(|c| c.eq_ignore_ascii_case("T1"));

    let mut result = GeoResult {
        locality: city.clone(),
        city,
        postcode: first_header(headers, &["x-vercel-ip-postal-code", "cf-postal-code"]),
        state: header(headers, "cf-region"),
        state_code: first_header(headers, &["x-vercel-ip-country-region", "cf-region-code"]),
        country_code,
        latitude: coordinate(headers, &["x-vercel-ip-latitude", "cf-iplatitude"]),
        longitude: coordinate(headers, &["x-vercel-ip-longitude", "cf-iplongitude"]),
        is_tor,
        ..Default::default()
    };

    result.source = if result.has_location() {
        GeoSource::Fallback
    } else {
        GeoSource::None
    };
    result
}
