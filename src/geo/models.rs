//! Geolocation value objects and the confidence-weighted merge

use serde::{Deserialize, Serialize};

/// Which source supplied the primary location field of a [`GeoResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoSource {
    /// High-precision external provider
    Primary,
    /// Edge-network headers (and the local City database behind them)
    Fallback,
    #[default]
    None,
}

impl GeoSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoSource::Primary => "primary",
            GeoSource::Fallback => "fallback",
            GeoSource::None => "none",
        }
    }
}

/// Trust band derived from the confidence radius
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    /// Under 1 km: suburb level
    High,
    /// 1 km up to 5 km
    Medium,
    /// 5 km up to 20 km
    Low,
    /// 20 km or more, or no radius reported
    Unreliable,
}

impl ConfidenceLevel {
    pub fn from_radius_km(radius_km: Option<f64>) -> Self {
        match radius_km {
            Some(r) if r.is_finite() && r >= 0.0 && r < 1.0 => ConfidenceLevel::High,
            Some(r) if r.is_finite() && r >= 1.0 && r < 5.0 => ConfidenceLevel::Medium,
            Some(r) if r.is_finite() && r >= 5.0 && r < 20.0 => ConfidenceLevel::Low,
            _ => ConfidenceLevel::Unreliable,
        }
    }

    /// High and medium results are used verbatim
    pub fn is_authoritative(&self) -> bool {
        matches!(self, ConfidenceLevel::High | ConfidenceLevel::Medium)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoResult {
    /// Suburb / locality
    pub locality: Option<String>,
    pub city: Option<String>,
    pub postcode: Option<String>,
    pub state: Option<String>,
    pub state_code: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub isp: Option<String>,
    pub network_type: Option<String>,
    pub connection_type: Option<String>,
    pub is_vpn: bool,
    pub is_proxy: bool,
    pub is_tor: bool,
    pub confidence_km: Option<f64>,
    pub source: GeoSource,
}

impl GeoResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn confidence_level(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_radius_km(self.confidence_km)
    }

    /// The field that names "where": locality, or city when no locality is known
    pub fn location_label(&self) -> Option<&str> {
        self.locality.as_deref().or(self.city.as_deref())
    }

    pub fn has_location(&self) -> bool {
        self.location_label().is_some() || self.country_code.is_some() || self.country.is_some()
    }

    /// Traffic that should be kept but flagged for later filtering
    pub fn is_anonymized(&self) -> bool {
        self.is_vpn || self.is_proxy || self.is_tor
    }

    /// Fill every missing field from `other`; present fields are kept
    pub fn fill_missing_from(&mut self, other: &GeoResult) {
        fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(value);
            }
        }

        fill(&mut self.locality, &other.locality);
        fill(&mut self.city, &other.city);
        fill(&mut self.postcode, &other.postcode);
        fill(&mut self.state, &other.state);
        fill(&mut self.state_code, &other.state_code);
        fill(&mut self.country, &other.country);
        fill(&mut self.country_code, &other.country_code);
        fill(&mut self.latitude, &other.latitude);
        fill(&mut self.longitude, &other.longitude);
        fill(&mut self.isp, &other.isp);
        fill(&mut self.network_type, &other.network_type);
        fill(&mut self.connection_type, &other.connection_type);
        self.is_vpn |= other.is_vpn;
        self.is_proxy |= other.is_proxy;
        self.is_tor |= other.is_tor;
    }
}

/// Merge the precision result with the lower-precision fallback.
///
/// A high or medium confidence primary is returned as-is. Anything less only
/// has its missing fields filled from the fallback, field by field, and the
/// source tag names whichever side supplied the location label.
pub fn merge(primary: GeoResult, fallback: GeoResult) -> GeoResult {
    if primary.confidence_level().is_authoritative() {
        return GeoResult {
            source: GeoSource::Primary,
            ..primary
        };
    }

    let primary_had_label = primary.location_label().is_some();
    let primary_had_country = primary.country_code.is_some() || primary.country.is_some();

    let mut merged = primary;
    merged.fill_missing_from(&fallback);

    merged.source = if primary_had_label {
        GeoSource::Primary
    } else if fallback.location_label().is_some() {
        GeoSource::Fallback
    } else if primary_had_country {
        GeoSource::Primary
    } else if fallback.has_location() {
        GeoSource::Fallback
    } else {
        GeoSource::None
    };

    if merged.source == GeoSource::Fallback {
        merged.confidence_km = fallback.confidence_km;
    }

    merged
}
