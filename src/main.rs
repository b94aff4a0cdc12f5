use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use scanlink::app::{create_app, AppState};
use scanlink::config::{Config, DatabaseBackend};
use scanlink::conversion::ConversionDispatcher;
use scanlink::geo::{GeoProvider, GeoResolver, HttpGeoProvider, MaxMindDatabase};
use scanlink::privacy::{CredentialCipher, IpHasher};
use scanlink::storage::{CachedStorage, PostgresStorage, SqliteStorage, Storage};
use scanlink::tracking::Tracker;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}

fn build_geo_resolver(config: &Config) -> GeoResolver {
    let provider: Option<Arc<dyn GeoProvider>> = match HttpGeoProvider::from_config(&config.geo) {
        Ok(Some(provider)) => {
            info!("🌍 Precision geolocation enabled (timeout {}ms)", config.geo.timeout_ms);
            Some(Arc::new(provider))
        }
        Ok(None) => {
            warn!("GEO_API_KEY not set, geolocation limited to edge headers and local database");
            None
        }
        Err(e) => {
            warn!("Precision geolocation disabled: {e:#}");
            None
        }
    };

    let local_db = match (&config.geo.city_db_path, &config.geo.asn_db_path) {
        (None, None) => None,
        (city, asn) => match MaxMindDatabase::new(city.as_deref(), asn.as_deref()) {
            Ok(db) => {
                info!("Loaded local GeoIP database");
                Some(db)
            }
            Err(e) => {
                warn!("Failed to load local GeoIP database: {e:#}");
                None
            }
        },
    };

    GeoResolver::new(provider, local_db, Duration::from_millis(config.geo.timeout_ms))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scanlink=info,tower_http=warn")),
        )
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    let backend: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            Arc::new(SqliteStorage::new(&config.database.url, config.database.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(PostgresStorage::new(&config.database.url, config.database.max_connections).await?)
        }
    };

    info!("Initializing database...");
    backend.init().await?;
    info!("Database initialized successfully");

    let storage: Arc<dyn Storage> = Arc::new(CachedStorage::new(
        backend,
        config.cache.max_entries,
        config.cache.ttl_secs,
    ));

    // A bad key only disables decryption; affected campaigns log at dispatch time
    let cipher = match CredentialCipher::from_config(config.privacy.encryption_key.as_deref()) {
        Ok(Some(cipher)) => Some(Arc::new(cipher)),
        Ok(None) => {
            warn!("ENCRYPTION_KEY not set, encrypted pixel tokens cannot be used");
            None
        }
        Err(e) => {
            error!("ENCRYPTION_KEY is invalid: {e}");
            None
        }
    };

    let hasher = IpHasher::new(config.privacy.ip_hash_salt.as_deref());
    if !hasher.is_enabled() {
        warn!("IP_HASH_SALT not set, scans are stored without an IP hash");
    }

    let dispatcher = ConversionDispatcher::from_config(&config.conversion, cipher)?;
    if let Some(code) = &config.conversion.test_event_code {
        info!("Conversion events tagged with test code {code}");
    }

    let tracker = Arc::new(Tracker::new(
        Arc::clone(&storage),
        Arc::new(build_geo_resolver(&config)),
        Arc::new(dispatcher),
        hasher,
    ));

    let state = Arc::new(AppState {
        storage,
        tracker,
        redirect: config.redirect.clone(),
        client_ip: config.client_ip.clone(),
    });

    let app = create_app(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Listening on http://{}", addr);
    info!("   - Scans at {}/{{code}}", config.redirect.redirect_prefix);
    info!("   - Bridge API at {}/{{code}}", config.redirect.api_prefix);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
