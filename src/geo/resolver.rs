//! Best-effort geolocation: precision provider merged with the fallback chain

use axum::http::HeaderMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::edge::from_edge_headers;
use super::ip_extractor::is_private_or_local;
use super::maxmind::MaxMindDatabase;
use super::models::{merge, GeoResult};
use super::provider::GeoProvider;

pub struct GeoResolver {
    provider: Option<Arc<dyn GeoProvider>>,
    local_db: Option<MaxMindDatabase>,
    timeout: Duration,
}

impl GeoResolver {
    pub fn new(
        provider: Option<Arc<dyn GeoProvider>>,
        local_db: Option<MaxMindDatabase>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            local_db: local_db.filter(|db| !db.is_empty()),
            timeout,
        }
    }

    /// No precision provider, no local database: edge headers only
    pub fn headers_only() -> Self {
        Self::new(None, None, Duration::from_millis(0))
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Secondary source: edge headers, gaps filled from the local database.
    ///
    /// Synchronous and I/O free, so the redirect path captures it before the
    /// request headers go away.
    pub fn fallback(&self, headers: &HeaderMap, ip: IpAddr) -> GeoResult {
        let mut fallback = from_edge_headers(headers);

        if let Some(db) = &self.local_db {
            if !is_private_or_local(&ip) {
                let local = db.lookup(ip);
                let had_location = fallback.has_location();
                fallback.fill_missing_from(&local);
                if !had_location {
                    fallback.confidence_km = local.confidence_km;
                    fallback.source = local.source;
                }
            }
        }

        fallback
    }

    /// Resolve `ip`, never failing. Private addresses skip the provider; any
    /// provider failure or timeout degrades to the fallback alone.
    pub async fn resolve(&self, ip: IpAddr, fallback: GeoResult) -> GeoResult {
        if is_private_or_local(&ip) {
            debug!(%ip, "skipping geolocation for private address");
            return merge(GeoResult::empty(), fallback);
        }

        let Some(provider) = &self.provider else {
            return merge(GeoResult::empty(), fallback);
        };

        let primary = match tokio::time::timeout(self.timeout, provider.lookup(ip)).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                warn!(provider = provider.name(), error = %err, "geolocation lookup failed");
                GeoResult::empty()
            }
            Err(_) => {
                warn!(
                    provider = provider.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "geolocation lookup timed out"
                );
                GeoResult::empty()
            }
        };

        merge(primary, fallback)
    }
}
