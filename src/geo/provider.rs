//! High-precision external geolocation provider
//!
//! One HTTP GET per unseen IP, bounded by a short timeout. Successful results
//! are cached per IP; failures are not, so a provider outage does not pin
//! empty results for the cache TTL.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use serde::de::IgnoredAny;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::trace;

use super::models::{GeoResult, GeoSource};
use crate::config::GeoConfig;

const CACHE_TTL_SECS: u64 = 15 * 60;
const CACHE_MAX_CAPACITY: u64 = 10_000;

#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Look up one public IP. Errors are reported, never defaulted, so the
    /// resolver decides how to degrade.
    async fn lookup(&self, ip: IpAddr) -> Result<GeoResult>;

    fn name(&self) -> &'static str;
}

/// Provider response.
///
/// Vendors disagree on key names and often send several spellings of the
/// same fact in one body (ipgeolocation.io sends `isp` and `organization`,
/// ipapi.co sends `country` and `country_name`), so every spelling is its
/// own field and `into_geo` picks between them in a fixed order.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProviderResponse {
    locality: Option<Scalar>,
    suburb: Option<Scalar>,
    district: Option<Scalar>,
    city: Option<Scalar>,

    postcode: Option<Scalar>,
    postal: Option<Scalar>,
    zip: Option<Scalar>,
    zipcode: Option<Scalar>,
    postal_code: Option<Scalar>,

    state: Option<Scalar>,
    region: Option<Scalar>,
    region_name: Option<Scalar>,
    #[serde(rename = "regionName")]
    region_name_camel: Option<Scalar>,
    state_prov: Option<Scalar>,

    state_code: Option<Scalar>,
    region_code: Option<Scalar>,
    state_prov_code: Option<Scalar>,

    /// A full name on most vendors, an ISO code on ipapi.co and ipinfo
    country: Option<Scalar>,
    country_name: Option<Scalar>,
    country_code: Option<Scalar>,
    country_code2: Option<Scalar>,
    #[serde(rename = "countryCode")]
    country_code_camel: Option<Scalar>,

    latitude: Option<Scalar>,
    lat: Option<Scalar>,
    longitude: Option<Scalar>,
    lon: Option<Scalar>,
    lng: Option<Scalar>,
    /// ipinfo: `"lat,lon"`
    loc: Option<Scalar>,

    confidence_km: Option<Scalar>,
    accuracy_radius: Option<Scalar>,
    confidence_radius: Option<Scalar>,
    accuracy_radius_km: Option<Scalar>,

    isp: Option<Scalar>,
    org: Option<Scalar>,
    organization: Option<Scalar>,
    /// `"AS1221"` on ipapi.co, an object with the operator name elsewhere
    asn: Option<serde_json::Value>,

    network_type: Option<Scalar>,
    connection_type: Option<Scalar>,

    is_vpn: Option<bool>,
    is_proxy: Option<bool>,
    proxy: Option<bool>,
    is_tor: Option<bool>,
    security: Option<SecurityFlags>,
    privacy: Option<SecurityFlags>,

    /// ipgeolocation.io v2 nests the geography one level down
    location: Option<Box<ProviderResponse>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SecurityFlags {
    is_vpn: Option<bool>,
    vpn: Option<bool>,
    is_proxy: Option<bool>,
    proxy: Option<bool>,
    is_tor: Option<bool>,
    tor: Option<bool>,
}

impl SecurityFlags {
    fn vpn(&self) -> Option<bool> {
        self.is_vpn.or(self.vpn)
    }

    fn proxy(&self) -> Option<bool> {
        self.is_proxy.or(self.proxy)
    }

    fn tor(&self) -> Option<bool> {
        self.is_tor.or(self.tor)
    }
}

/// Some providers quote their numbers, others send postcodes as numbers.
/// Anything else in a scalar slot is ignored rather than failing the body.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Number(f64),
    Text(String),
    Other(IgnoredAny),
}

impl Scalar {
    fn number(&self) -> Option<f64> {
        let value = match self {
            Scalar::Number(n) => Some(*n),
            Scalar::Text(s) => s.trim().parse::<f64>().ok(),
            Scalar::Other(_) => None,
        };
        value.filter(|v| v.is_finite())
    }

    fn text(&self) -> Option<String> {
        match self {
            Scalar::Text(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            Scalar::Number(n) if n.is_finite() => Some(n.to_string()),
            _ => None,
        }
    }
}

/// First present text value, in order
fn first_text(candidates: &[&Option<Scalar>]) -> Option<String> {
    candidates.iter().find_map(|c| match c {
        Some(value) => value.text(),
        None => None,
    })
}

fn first_number(candidates: &[&Option<Scalar>]) -> Option<f64> {
    candidates.iter().find_map(|c| match c {
        Some(value) => value.number(),
        None => None,
    })
}

fn is_country_code(value: &str) -> bool {
    value.len() == 2 && value.chars().all(|c| c.is_ascii_alphabetic())
}

/// `"AS1221 Telstra Corporation Ltd"` -> `"Telstra Corporation Ltd"`
fn strip_as_number(org: String) -> String {
    let Some((prefix, rest)) = org.split_once(' ') else {
        return org;
    };
    let is_as_number = prefix
        .strip_prefix("AS")
        .or_else(|| prefix.strip_prefix("as"))
        .is_some_and(|d| !d.is_empty() && d.chars().all(|c| c.is_ascii_digit()));
    if is_as_number {
        rest.trim().to_string()
    } else {
        org
    }
}

fn asn_operator(asn: &serde_json::Value) -> Option<String> {
    ["organization", "name"]
        .into_iter()
        .find_map(|key| asn.get(key).and_then(|v| v.as_str()))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ProviderResponse {
    fn into_geo(self) -> GeoResult {
        let country = first_text(&[&self.country]);
        let (country_as_code, country_as_name) = match country {
            Some(c) if is_country_code(&c) => (Some(c), None),
            other => (None, other),
        };

        let (mut latitude, mut longitude) = (
            first_number(&[&self.latitude, &self.lat]),
            first_number(&[&self.longitude, &self.lon, &self.lng]),
        );
        if latitude.is_none() || longitude.is_none() {
            if let Some((lat, lon)) = self.loc.as_ref().and_then(Scalar::text).and_then(|loc| {
                let (lat, lon) = loc.split_once(',')?;
                Some((lat.trim().parse::<f64>().ok()?, lon.trim().parse::<f64>().ok()?))
            }) {
                latitude = latitude.or(Some(lat));
                longitude = longitude.or(Some(lon));
            }
        }

        let isp = first_text(&[&self.isp])
            .or_else(|| first_text(&[&self.org]).map(strip_as_number))
            .or_else(|| first_text(&[&self.organization]))
            .or_else(|| self.asn.as_ref().and_then(asn_operator));

        let security = self.security.unwrap_or_default();
        let privacy = self.privacy.unwrap_or_default();

        let mut geo = GeoResult {
            locality: first_text(&[&self.locality, &self.suburb, &self.district]),
            city: first_text(&[&self.city]),
            postcode: first_text(&[
                &self.postcode,
                &self.postal,
                &self.zip,
                &self.zipcode,
                &self.postal_code,
            ]),
            state: first_text(&[
                &self.state,
                &self.region,
                &self.region_name,
                &self.region_name_camel,
                &self.state_prov,
            ]),
            state_code: first_text(&[&self.state_code, &self.region_code, &self.state_prov_code]),
            country: first_text(&[&self.country_name]).or(country_as_name),
            country_code: first_text(&[&self.country_code, &self.country_code2, &self.country_code_camel])
                .or(country_as_code)
                .map(|c| c.to_uppercase()),
            latitude,
            longitude,
            isp,
            network_type: first_text(&[&self.network_type]),
            connection_type: first_text(&[&self.connection_type]),
            is_vpn: self.is_vpn.or(security.vpn()).or(privacy.vpn()).unwrap_or(false),
            is_proxy: self
                .is_proxy
                .or(self.proxy)
                .or(security.proxy())
                .or(privacy.proxy())
                .unwrap_or(false),
            is_tor: self.is_tor.or(security.tor()).or(privacy.tor()).unwrap_or(false),
            confidence_km: first_number(&[
                &self.confidence_km,
                &self.accuracy_radius,
                &self.confidence_radius,
                &self.accuracy_radius_km,
            ]),
            source: GeoSource::Primary,
        };

        if let Some(nested) = self.location {
            let nested = nested.into_geo();
            geo.confidence_km = geo.confidence_km.or(nested.confidence_km);
            geo.fill_missing_from(&nested);
        }
        geo
    }
}

pub struct HttpGeoProvider {
    client: Client,
    url_template: String,
    api_key: String,
    cache: Cache<IpAddr, GeoResult>,
}

impl HttpGeoProvider {
    /// `url_template` carries `{ip}` and `{key}` placeholders
    pub fn new(url_template: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        if !url_template.contains("{ip}") {
            bail!("geolocation URL template must contain an {{ip}} placeholder");
        }

        let client = Client::builder()
            .user_agent(concat!("scanlink-geo/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for geolocation")?;

        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(CACHE_TTL_SECS))
            .max_capacity(CACHE_MAX_CAPACITY)
            .build();

        Ok(Self {
            client,
            url_template: url_template.to_string(),
            api_key: api_key.to_string(),
            cache,
        })
    }

    /// `None` when no API key is configured
    pub fn from_config(config: &GeoConfig) -> Result<Option<Self>> {
        match config.api_key.as_deref() {
            Some(key) => Self::new(&config.api_url, key, Duration::from_millis(config.timeout_ms)).map(Some),
            None => Ok(None),
        }
    }

    fn url_for(&self, ip: IpAddr) -> String {
        self.url_template
            .replace("{ip}", &ip.to_string())
            .replace("{key}", &urlencoding::encode(&self.api_key))
    }

    async fn fetch(&self, ip: IpAddr) -> Result<GeoResult> {
        let response = self
            .client
            .get(self.url_for(ip))
            .send()
            .await
            .context("geolocation request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("geolocation provider returned {}", status));
        }

        let body: ProviderResponse = response
            .json()
            .await
            .context("geolocation response was not valid JSON")?;
        Ok(body.into_geo())
    }
}

#[async_trait]
impl GeoProvider for HttpGeoProvider {
    async fn lookup(&self, ip: IpAddr) -> Result<GeoResult> {
        if let Some(cached) = self.cache.get(&ip).await {
            trace!(%ip, "geolocation cache hit");
            return Ok(cached);
        }

        let result = self.fetch(ip).await?;
        self.cache.insert(ip, result.clone()).await;
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_security_and_quoted_numbers() {
        let json = r#"{
            "suburb": "Bondi Junction",
            "city": "Sydney",
            "postal": "2022",
            "region": "New South Wales",
            "region_code": "NSW",
            "country_name": "Australia",
            "country_code2": "au",
            "lat": "-33.8917",
            "lng": 151.2479,
            "accuracy_radius": 0.8,
            "org": "TPG Internet",
            "connection_type": "cable",
            "security": { "vpn": false, "proxy": true, "tor": false }
        }"#;

        let parsed: ProviderResponse = serde_json::from_str(json).unwrap();
        let geo = parsed.into_geo();
        assert_eq!(geo.locality.as_deref(), Some("Bondi Junction"));
        assert_eq!(geo.postcode.as_deref(), Some("2022"));
        assert_eq!(geo.country_code.as_deref(), Some("AU"));
        assert_eq!(geo.latitude, Some(-33.8917));
        assert_eq!(geo.longitude, Some(151.2479));
        assert_eq!(geo.confidence_km, Some(0.8));
        assert!(geo.is_proxy);
        assert!(!geo.is_vpn);
        assert_eq!(geo.source, GeoSource::Primary);
    }

    #[test]
    fn test_parse_empty_object() {
        let geo = serde_json::from_str::<ProviderResponse>("{}").unwrap().into_geo();
        assert_eq!(geo.location_label(), None);
        assert_eq!(geo.confidence_km, None);
    }

    fn parse(json: &str) -> GeoResult {
        serde_json::from_str::<ProviderResponse>(json).unwrap().into_geo()
    }

    #[test]
    fn test_isp_and_organization_together() {
        let geo = parse(
            r#"{"city":"Sydney","district":"Bondi","zipcode":"2026","isp":"Telstra","organization":"Telstra Corp"}"#,
        );
        assert_eq!(geo.locality.as_deref(), Some("Bondi"));
        assert_eq!(geo.postcode.as_deref(), Some("2026"));
        assert_eq!(geo.isp.as_deref(), Some("Telstra"));
    }

    #[test]
    fn test_ipgeolocation_flat_body() {
        let geo = parse(
            r#"{
                "ip": "1.120.0.1",
                "continent_code": "OC",
                "country_code2": "AU",
                "country_code3": "AUS",
                "country_name": "Australia",
                "state_prov": "New South Wales",
                "state_code": "AU-NSW",
                "district": "Bondi",
                "city": "Sydney",
                "zipcode": "2026",
                "latitude": "-33.89143",
                "longitude": "151.27699",
                "is_eu": false,
                "isp": "Telstra Corporation",
                "connection_type": "",
                "organization": "Telstra Corporation Ltd",
                "time_zone": { "name": "Australia/Sydney", "offset": 10 },
                "currency": { "code": "AUD", "name": "Australian Dollar", "symbol": "A$" }
            }"#,
        );
        assert_eq!(geo.location_label(), Some("Bondi"));
        assert_eq!(geo.city.as_deref(), Some("Sydney"));
        assert_eq!(geo.postcode.as_deref(), Some("2026"));
        assert_eq!(geo.state.as_deref(), Some("New South Wales"));
        assert_eq!(geo.country.as_deref(), Some("Australia"));
        assert_eq!(geo.country_code.as_deref(), Some("AU"));
        assert_eq!(geo.latitude, Some(-33.89143));
        assert_eq!(geo.isp.as_deref(), Some("Telstra Corporation"));
        assert_eq!(geo.connection_type, None);
        assert_eq!(geo.confidence_km, None);
    }

    #[test]
    fn test_ipgeolocation_nested_body() {
        let geo = parse(
            r#"{
                "ip": "1.120.0.1",
                "location": {
                    "continent_code": "OC",
                    "country_code2": "AU",
                    "country_name": "Australia",
                    "state_prov": "New South Wales",
                    "state_code": "AU-NSW",
                    "district": "Bondi",
                    "city": "Sydney",
                    "zipcode": "2026",
                    "latitude": "-33.89143",
                    "longitude": "151.27699",
                    "accuracy_radius": "2.5"
                },
                "asn": { "as_number": "AS1221", "organization": "Telstra Limited", "country": "AU" },
                "security": { "threat_score": 0, "is_tor": false, "is_proxy": false, "is_vpn": true }
            }"#,
        );
        assert_eq!(geo.locality.as_deref(), Some("Bondi"));
        assert_eq!(geo.postcode.as_deref(), Some("2026"));
        assert_eq!(geo.state_code.as_deref(), Some("AU-NSW"));
        assert_eq!(geo.country_code.as_deref(), Some("AU"));
        assert_eq!(geo.longitude, Some(151.27699));
        assert_eq!(geo.isp.as_deref(), Some("Telstra Limited"));
        assert_eq!(geo.confidence_km, Some(2.5));
        assert!(geo.is_vpn);
        assert!(!geo.is_proxy);
    }

    #[test]
    fn test_ipapi_co_body() {
        let geo = parse(
            r#"{
                "ip": "1.120.0.1",
                "network": "1.120.0.0/13",
                "version": "IPv4",
                "city": "Sydney",
                "region": "New South Wales",
                "region_code": "NSW",
                "country": "AU",
                "country_name": "Australia",
                "country_code": "AU",
                "country_code_iso3": "AUS",
                "in_eu": false,
                "postal": "2000",
                "latitude": -33.8591,
                "longitude": 151.2002,
                "timezone": "Australia/Sydney",
                "country_area": 7686850.0,
                "country_population": 25499881,
                "asn": "AS1221",
                "org": "Telstra Corporation Ltd"
            }"#,
        );
        assert_eq!(geo.location_label(), Some("Sydney"));
        assert_eq!(geo.locality, None);
        assert_eq!(geo.postcode.as_deref(), Some("2000"));
        assert_eq!(geo.state_code.as_deref(), Some("NSW"));
        assert_eq!(geo.country.as_deref(), Some("Australia"));
        assert_eq!(geo.country_code.as_deref(), Some("AU"));
        assert_eq!(geo.latitude, Some(-33.8591));
        assert_eq!(geo.isp.as_deref(), Some("Telstra Corporation Ltd"));
        assert_eq!(geo.confidence_km, None);
    }

    #[test]
    fn test_ipinfo_body() {
        let geo = parse(
            r#"{
                "ip": "1.120.0.1",
                "city": "Sydney",
                "region": "New South Wales",
                "country": "AU",
                "loc": "-33.8678,151.2073",
                "org": "AS1221 Telstra Corporation Ltd",
                "postal": "2000",
                "timezone": "Australia/Sydney",
                "privacy": { "vpn": false, "proxy": false, "tor": true, "relay": false, "hosting": false, "service": "" }
            }"#,
        );
        assert_eq!(geo.location_label(), Some("Sydney"));
        assert_eq!(geo.postcode.as_deref(), Some("2000"));
        assert_eq!(geo.country_code.as_deref(), Some("AU"));
        assert_eq!(geo.country, None);
        assert_eq!(geo.latitude, Some(-33.8678));
        assert_eq!(geo.longitude, Some(151.2073));
        assert_eq!(geo.isp.as_deref(), Some("Telstra Corporation Ltd"));
        assert_eq!(geo.confidence_km, None);
        assert!(geo.is_tor);
    }

    #[test]
    fn test_numeric_postcode_and_object_fields() {
        let geo = parse(r#"{"city":{"names":{"en":"Sydney"}},"zip":2026,"accuracy_radius":5}"#);
        assert_eq!(geo.city, None);
        assert_eq!(geo.postcode.as_deref(), Some("2026"));
        assert_eq!(geo.confidence_km, Some(5.0));
    }

    #[test]
    fn test_url_template() {
        let provider = HttpGeoProvider::new(
            "https://geo.example.com/v1?ip={ip}&key={key}",
            "k&1",
            Duration::from_millis(100),
        )
        .unwrap();
        assert_eq!(
            provider.url_for("203.0.113.4".parse().unwrap()),
            "https://geo.example.com/v1?ip=203.0.113.4&key=k%261"
        );
    }

    #[test]
    fn test_template_requires_ip_placeholder() {
        assert!(HttpGeoProvider::new("https://geo.example.com", "k", Duration::from_millis(100)).is_err());
    }
}
