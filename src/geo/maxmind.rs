//! Local MaxMind City/ASN lookups backing the fallback geolocation chain
//!
//! Memory-mapped readers are opened once at startup and shared by every
//! request; a lookup is a pure in-memory tree walk.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;

use super::models::{GeoResult, GeoSource};

#[derive(Clone)]
pub struct MaxMindDatabase {
    city_reader: Option<Arc<Reader<Mmap>>>,
    asn_reader: Option<Arc<Reader<Mmap>>>,
}

impl MaxMindDatabase {
    /// Open the City and/or ASN `.mmdb` files; either may be absent
    pub fn new(city_path: Option<&str>, asn_path: Option<&str>) -> Result<Self> {
        let city_reader = if let Some(path) = city_path {
            let reader = unsafe { Reader::open_mmap(path) }
                .with_context(|| format!("Failed to open GeoIP City database at {}", path))?;
            Some(Arc::new(reader))
        } else {
            None
        };

        let asn_reader = if let Some(path) = asn_path {
            let reader = unsafe { Reader::open_mmap(path) }
                .with_context(|| format!("Failed to open GeoIP ASN database at {}", path))?;
            Some(Arc::new(reader))
        } else {
            None
        };

        Ok(Self {
            city_reader,
            asn_reader,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.city_reader.is_none() && self.asn_reader.is_none()
    }

    pub fn lookup(&self, ip: IpAddr) -> GeoResult {
        let mut geo = GeoResult::default();

        if let Some(ref reader) = self.city_reader {
            if let Ok(result) = reader.lookup(ip) {
                if let Ok(Some(city)) = result.decode::<geoip2::City>() {
                    extract_from_city(&city, &mut geo);
                }
            }
        }

        if let Some(ref reader) = self.asn_reader {
            if let Ok(result) = reader.lookup(ip) {
                if let Ok(Some(asn)) = result.decode::<geoip2::Asn>() {
                    geo.isp = asn.autonomous_system_organization.map(|s| s.to_string());
                }
            }
        }

        if geo.has_location() {
            geo.source = GeoSource::Fallback;
        }
        geo
    }
}

fn extract_from_city(city: &geoip2::City, geo: &mut GeoResult) {
    geo.country_code = city.country.iso_code.map(|s| s.to_string());
    geo.country = city.country.names.english.map(|s| s.to_string());

    if let Some(subdivision) = city.subdivisions.first() {
        geo.state = subdivision.names.english.map(|s| s.to_string());
        geo.state_code = subdivision.iso_code.map(|s| s.to_string());
    }

    geo.city = city.city.names.english.map(|s| s.to_string());
    geo.postcode = city.postal.code.map(|s| s.to_string());
    geo.latitude = city.location.latitude;
    geo.longitude = city.location.longitude;
    // MaxMind reports its accuracy radius in kilometres
    geo.confidence_km = city.location.accuracy_radius.map(f64::from);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_creation_invalid_path() {
        let result = MaxMindDatabase::new(Some("/nonexistent/path.mmdb"), None);
        assert!(result.is_err());
    }

    #[test]
    fn test_database_creation_no_files() {
        let db = MaxMindDatabase::new(None, None).unwrap();
        assert!(db.is_empty());
        assert_eq!(db.lookup("8.8.8.8".parse().unwrap()), GeoResult::empty());
    }
}
