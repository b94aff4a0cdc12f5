use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub redirect: RedirectConfig,
    pub geo: GeoConfig,
    pub conversion: ConversionConfig,
    pub privacy: PrivacyConfig,
    pub client_ip: ClientIpConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectConfig {
    /// Path prefix of the QR entry point, e.g. `/q` for `/q/{code}`
    pub redirect_prefix: String,
    /// Path prefix of the bridge API, e.g. `/api/q` for `/api/q/{code}/track`
    pub api_prefix: String,
    /// Where unknown or inactive codes are sent
    pub default_url: String,
    /// Absolute origin prepended to bridge locations. Relative when unset.
    pub public_base_url: Option<String>,
}

impl RedirectConfig {
    /// Location of the bridge page for `code`, carrying the dedup event id
    pub fn bridge_location(&self, code: &str, event_id: &str) -> String {
        format!(
            "{}{}/{}/bridge?eid={}",
            self.public_base_url.as_deref().unwrap_or(""),
            self.redirect_prefix,
            urlencoding::encode(code),
            event_id
        )
    }
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            redirect_prefix: "/q".to_string(),
            api_prefix: "/api/q".to_string(),
            default_url: "https://example.com/".to_string(),
            public_base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConfig {
    pub api_key: Option<String>,
    /// URL template with `{ip}` and `{key}` placeholders
    pub api_url: String,
    pub timeout_ms: u64,
    /// Optional MaxMind City database used to fill fallback fields
    pub city_db_path: Option<String>,
    /// Optional MaxMind ASN database, supplies the ISP name
    pub asn_db_path: Option<String>,
}

impl GeoConfig {
    pub const DEFAULT_API_URL: &'static str = "https://api.ipgeolocation.io/v2/ipgeo?apiKey={key}&ip={ip}";

    const fn default_timeout_ms() -> u64 {
        400
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: Self::DEFAULT_API_URL.to_string(),
            timeout_ms: Self::default_timeout_ms(),
            city_db_path: None,
            asn_db_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    pub api_url: String,
    pub api_version: String,
    pub event_name: String,
    pub test_event_code: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            api_url: "https://graph.facebook.com".to_string(),
            api_version: "v21.0".to_string(),
            event_name: "QRScan".to_string(),
            test_event_code: None,
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrivacyConfig {
    /// Symmetric key for credentials at rest (64 hex chars or base64 of 32 bytes)
    pub encryption_key: Option<String>,
    pub ip_hash_salt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    None,
    Standard,
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientIpConfig {
    pub trusted_proxy_mode: TrustedProxyMode,
    /// CIDR ranges of proxies allowed to append to X-Forwarded-For
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    /// Fixed number of proxy hops to skip from the right of X-Forwarded-For
    pub num_trusted_proxies: Option<usize>,
}

impl Default for ClientIpConfig {
    fn default() -> Self {
        Self {
            trusted_proxy_mode: TrustedProxyMode::Standard,
            trusted_proxies: Vec::new(),
            num_trusted_proxies: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_secs: 30,
        }
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalize_prefix(prefix: String) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./scanlink.db?mode=rwc".to_string());

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(10);

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid port number")?;

        let redirect_defaults = RedirectConfig::default();
        let redirect = RedirectConfig {
            redirect_prefix: env_opt("REDIRECT_PREFIX")
                .map(normalize_prefix)
                .unwrap_or(redirect_defaults.redirect_prefix),
            api_prefix: env_opt("API_PREFIX")
                .map(normalize_prefix)
                .unwrap_or(redirect_defaults.api_prefix),
            default_url: env_opt("DEFAULT_REDIRECT_URL").unwrap_or(redirect_defaults.default_url),
            public_base_url: env_opt("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),
        };

        let geo = GeoConfig {
            api_key: env_opt("GEO_API_KEY"),
            api_url: env_opt("GEO_API_URL").unwrap_or_else(|| GeoConfig::DEFAULT_API_URL.to_string()),
            timeout_ms: env_opt("GEO_TIMEOUT_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or_else(GeoConfig::default_timeout_ms),
            city_db_path: env_opt("GEOIP_CITY_DB_PATH"),
            asn_db_path: env_opt("GEOIP_ASN_DB_PATH"),
        };

        let conversion_defaults = ConversionConfig::default();
        let conversion = ConversionConfig {
            api_url: env_opt("CONVERSION_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(conversion_defaults.api_url),
            api_version: env_opt("CONVERSION_API_VERSION").unwrap_or(conversion_defaults.api_version),
            event_name: env_opt("CONVERSION_EVENT_NAME").unwrap_or(conversion_defaults.event_name),
            test_event_code: env_opt("CONVERSION_TEST_EVENT_CODE"),
            timeout_secs: env_opt("CONVERSION_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(conversion_defaults.timeout_secs),
        };

        let privacy = PrivacyConfig {
            encryption_key: env_opt("ENCRYPTION_KEY"),
            ip_hash_salt: env_opt("IP_HASH_SALT"),
        };

        let trusted_proxy_mode = match env_opt("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|| "standard".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'standard'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::Standard
            }
        };

        let client_ip = ClientIpConfig {
            trusted_proxy_mode,
            trusted_proxies: env_opt("TRUSTED_PROXIES")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            num_trusted_proxies: env_opt("NUM_TRUSTED_PROXIES").and_then(|v| v.parse().ok()),
        };

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            max_entries: env_opt("CAMPAIGN_CACHE_MAX_ENTRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(cache_defaults.max_entries),
            ttl_secs: env_opt("CAMPAIGN_CACHE_TTL_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(cache_defaults.ttl_secs),
        };

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            server: ServerConfig { host, port },
            redirect,
            geo,
            conversion,
            privacy,
            client_ip,
            cache,
        })
    }
}
