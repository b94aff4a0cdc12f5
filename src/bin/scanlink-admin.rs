use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use scanlink::config::{Config, DatabaseBackend};
use scanlink::models::{CampaignStatus, CookieDuration, NewCampaign, PixelCredential, DEFAULT_BRIDGE_DURATION_MS};
use scanlink::privacy::CredentialCipher;
use scanlink::storage::{PostgresStorage, SqliteStorage, Storage, StorageError};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "scanlink-admin")]
#[command(about = "Scanlink campaign and credential management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an active campaign
    CreateCampaign {
        /// Short code printed in the QR URL
        short_code: String,
        /// Where scans end up
        destination_url: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        slug: Option<String>,
        /// Account that owns the campaign (used for the fallback pixel)
        #[arg(long)]
        owner: Option<String>,
        /// Visit cookie lifetime: 1, 7, 30, 90 or 365 days
        #[arg(long, default_value_t = 30)]
        cookie_days: i64,
        /// Route scans through the bridge page
        #[arg(long)]
        bridge: bool,
        #[arg(long, default_value_t = DEFAULT_BRIDGE_DURATION_MS)]
        bridge_ms: u64,
        #[arg(long)]
        pixel_id: Option<String>,
        /// Stored encrypted when ENCRYPTION_KEY is set
        #[arg(long)]
        access_token: Option<String>,
    },
    /// Change a campaign's status (active, paused, archived)
    SetStatus { short_code: String, status: String },
    /// Set the account-level fallback pixel
    SetAccountPixel {
        owner: String,
        pixel_id: String,
        access_token: String,
    },
    /// Encrypt a secret with ENCRYPTION_KEY and print the stored form
    EncryptSecret { plaintext: String },
    /// Show the aggregate buckets and latest scans of a campaign
    Stats {
        short_code: String,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

fn cipher(config: &Config) -> Result<Option<CredentialCipher>> {
    CredentialCipher::from_config(config.privacy.encryption_key.as_deref())
        .context("ENCRYPTION_KEY is invalid")
}

/// Encrypted when a key is configured, plaintext otherwise
fn credential(config: &Config, pixel_id: Option<String>, token: Option<String>) -> Result<PixelCredential> {
    let Some(token) = token else {
        return Ok(PixelCredential {
            pixel_id,
            ..Default::default()
        });
    };

    match cipher(config)? {
        Some(cipher) => Ok(PixelCredential {
            pixel_id,
            access_token: None,
            access_token_encrypted: Some(cipher.encrypt(&token)?),
        }),
        None => {
            eprintln!("⚠ ENCRYPTION_KEY not set, storing access token in plaintext");
            Ok(PixelCredential {
                pixel_id,
                access_token: Some(token),
                access_token_encrypted: None,
            })
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    if let Commands::EncryptSecret { plaintext } = &cli.command {
        let Some(cipher) = cipher(&config)? else {
            bail!("ENCRYPTION_KEY must be set to encrypt secrets");
        };
        let secret = cipher.encrypt(plaintext)?;
        println!("{}", serde_json::to_string_pretty(&secret)?);
        return Ok(());
    }

    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            Arc::new(SqliteStorage::new(&config.database.url, 1).await?)
        }
        DatabaseBackend::Postgres => {
            Arc::new(PostgresStorage::new(&config.database.url, 1).await?)
        }
    };

    // Ensure database is initialized
    storage.init().await?;

    match cli.command {
        Commands::CreateCampaign {
            short_code,
            destination_url,
            name,
            slug,
            owner,
            cookie_days,
            bridge,
            bridge_ms,
            pixel_id,
            access_token,
        } => {
            let Some(cookie_duration) = CookieDuration::from_days(cookie_days) else {
                bail!("cookie lifetime must be one of 1, 7, 30, 90 or 365 days");
            };

            let mut campaign = NewCampaign::new(&short_code, &destination_url);
            campaign.name = name.unwrap_or_else(|| short_code.clone());
            campaign.slug = slug;
            campaign.owner_id = owner;
            campaign.cookie_duration = cookie_duration;
            campaign.bridge_enabled = bridge;
            campaign.bridge_duration_ms = bridge_ms;
            campaign.pixel = credential(&config, pixel_id, access_token)?;

            match storage.create_campaign(&campaign).await {
                Ok(created) => println!(
                    "✓ Created campaign {} '{}' -> {}",
                    created.id, created.short_code, created.destination_url
                ),
                Err(StorageError::Conflict) => {
                    bail!("'{short_code}' or its slug is already used by an active campaign")
                }
                Err(StorageError::Other(e)) => return Err(e),
            }
        }
        Commands::SetStatus { short_code, status } => {
            let status: CampaignStatus = status
                .parse()
                .map_err(|_| anyhow::anyhow!("status must be active, paused or archived"))?;

            match storage.set_campaign_status(&short_code, status).await {
                Ok(true) => println!("✓ Campaign '{short_code}' is now {status}"),
                Ok(false) => println!("⚠ No non-archived campaign with code '{short_code}'"),
                Err(StorageError::Conflict) => {
                    bail!("another active campaign already owns '{short_code}'")
                }
                Err(StorageError::Other(e)) => return Err(e),
            }
        }
        Commands::SetAccountPixel {
            owner,
            pixel_id,
            access_token,
        } => {
            let pixel = credential(&config, Some(pixel_id), Some(access_token))?;
            storage.upsert_account_pixel(&owner, &pixel).await?;
            println!("✓ Account pixel set for '{owner}'");
        }
        Commands::Stats { short_code, limit } => {
            let Some(campaign) = storage.find_active_campaign(&short_code).await? else {
                bail!("no active campaign with code '{short_code}'");
            };

            let aggregates = storage.get_aggregates(campaign.id).await?;
            println!("Campaign {} '{}'", campaign.id, campaign.name);
            println!(
                "{:<12} {:>4} {:<20} {:<10} {:>7} {:>7} {:>6} {:>6} {:>7}",
                "Date", "Hour", "Locality", "Postcode", "Scans", "Unique", "Mobile", "Tablet", "Desktop"
            );
            println!("{}", "-".repeat(90));
            for bucket in aggregates {
                println!(
                    "{:<12} {:>4} {:<20} {:<10} {:>7} {:>7} {:>6} {:>6} {:>7}",
                    bucket.scan_date,
                    bucket.scan_hour,
                    bucket.locality,
                    bucket.postcode,
                    bucket.total_scans,
                    bucket.unique_visitors,
                    bucket.mobile_scans,
                    bucket.tablet_scans,
                    bucket.desktop_scans
                );
            }

            let scans = storage.list_scans(campaign.id, limit).await?;
            if !scans.is_empty() {
                println!();
                println!("Latest scans:");
                for scan in scans {
                    println!(
                        "{}  {}  {:<8} {:<20} first={} source={}",
                        scan.scanned_at,
                        scan.event_id,
                        scan.device_type,
                        scan.locality.as_deref().unwrap_or("-"),
                        scan.is_first_scan,
                        scan.geo_source
                    );
                }
            }
        }
        // Needs no database; handled above
        Commands::EncryptSecret { .. } => {}
    }

    Ok(())
}
