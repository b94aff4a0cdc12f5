//! Client geolocation
//!
//! A high-precision external provider is merged with a coarse fallback built
//! from edge-network headers (and an optional local MaxMind database). The
//! confidence radius decides which side wins; see [`models::merge`].

pub mod edge;
pub mod ip_extractor;
pub mod maxmind;
pub mod models;
pub mod provider;
pub mod resolver;

pub use ip_extractor::{extract_client_ip, is_private_or_local};
pub use maxmind::MaxMindDatabase;
pub use models::{merge, ConfidenceLevel, GeoResult, GeoSource};
pub use provider::{GeoProvider, HttpGeoProvider};
pub use resolver::GeoResolver;
