//! Integration tests for the storage backends
//!
//! Tests can be filtered by database backend using the DATABASE_BACKEND environment variable:
//! - `DATABASE_BACKEND=sqlite cargo test` - Run only SQLite tests
//! - `DATABASE_BACKEND=postgres cargo test` - Run only PostgreSQL tests (needs DATABASE_URL)
//! - By default, both backends are tested

use scanlink::models::{CampaignStatus, NewCampaign, NewScan};
use scanlink::storage::{PostgresStorage, SqliteStorage, Storage, StorageError};
use std::sync::Arc;

/// Get the database backend to test from environment variable
fn should_test_backend(backend: &str) -> bool {
    match std::env::var("DATABASE_BACKEND") {
        Ok(val) => val.to_lowercase() == backend.to_lowercase(),
        Err(_) => true, // Test all backends if not specified
    }
}

/// File-backed SQLite so concurrent writers use separate connections
async fn create_sqlite_storage(dir: &tempfile::TempDir) -> Arc<dyn Storage> {
    let url = format!("sqlite://{}", dir.path().join("scans.db").display());
    let storage = SqliteStorage::new(&url, 8).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

async fn create_postgres_storage() -> Option<Arc<dyn Storage>> {
    let db_url = std::env::var("DATABASE_URL").ok()?;
    let storage = PostgresStorage::new(&db_url, 5).await.ok()?;
    storage.init().await.ok()?;
    Some(Arc::new(storage))
}

fn scan(campaign_id: i64, i: usize) -> NewScan {
    let device_type = match i % 4 {
        0 | 1 => "mobile",
        2 => "tablet",
        _ => "desktop",
    };

    NewScan {
        campaign_id,
        visitor_id: format!("visitor-{:012}", i % 25),
        locality: Some("Bondi".to_string()),
        postcode: Some("2026".to_string()),
        state: Some("New South Wales".to_string()),
        geo_source: "primary".to_string(),
        device_type: device_type.to_string(),
        // The first scan of each of the 25 visitors
        is_first_scan: i < 25,
        event_id: format!("{i:032x}"),
        scanned_at: 1_700_000_000,
        ..Default::default()
    }
}

async fn concurrent_scans_are_all_counted(storage: Arc<dyn Storage>, short_code: &str) {
    let campaign = storage
        .create_campaign(&NewCampaign::new(short_code, "https://example.com/landing"))
        .await
        .unwrap();

    let campaign_id = campaign.id;
    let mut handles = vec![];
    for i in 0..100 {
        let storage = Arc::clone(&storage);
        handles.push(tokio::spawn(async move {
            storage.insert_scan(&scan(campaign_id, i)).await
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap().unwrap(), "every event id is new");
    }

    let aggregates = storage.get_aggregates(campaign.id).await.unwrap();
    assert_eq!(aggregates.len(), 1, "all scans share one bucket");
    let bucket = &aggregates[0];
    assert_eq!(bucket.total_scans, 100);
    assert_eq!(bucket.unique_visitors, 25);
    assert_eq!(bucket.mobile_scans, 50);
    assert_eq!(bucket.tablet_scans, 25);
    assert_eq!(bucket.desktop_scans, 25);
    assert_eq!(
        bucket.mobile_scans + bucket.tablet_scans + bucket.desktop_scans,
        bucket.total_scans
    );

    assert_eq!(storage.list_scans(campaign.id, 1000).await.unwrap().len(), 100);
}

#[tokio::test]
async fn test_concurrent_scans_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let storage = create_sqlite_storage(&dir).await;
    concurrent_scans_are_all_counted(storage, "conc01").await;
}

#[tokio::test]
async fn test_concurrent_scans_postgres() {
    if !should_test_backend("postgres") {
        return;
    }

    let Some(storage) = create_postgres_storage().await else {
        eprintln!("Skipping PostgreSQL test: DATABASE_URL not set or unreachable");
        return;
    };
    let code = format!("conc{}", std::process::id());
    concurrent_scans_are_all_counted(storage, &code).await;
}

#[tokio::test]
async fn test_concurrent_campaign_creation_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let storage = create_sqlite_storage(&dir).await;

    let mut handles = vec![];
    for i in 0..10 {
        let storage = Arc::clone(&storage);
        handles.push(tokio::spawn(async move {
            storage
                .create_campaign(&NewCampaign::new(
                    "same_code",
                    &format!("https://example.com/{i}"),
                ))
                .await
        }));
    }

    let mut success_count = 0;
    let mut conflict_count = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => success_count += 1,
            Err(StorageError::Conflict) => conflict_count += 1,
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    assert_eq!(success_count, 1, "Exactly one creation should succeed");
    assert_eq!(conflict_count, 9, "All others should conflict");
}

#[tokio::test]
async fn test_slug_cannot_shadow_active_code_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let storage = create_sqlite_storage(&dir).await;

    storage
        .create_campaign(&NewCampaign::new("summer", "https://example.com/a"))
        .await
        .unwrap();

    let mut shadowing = NewCampaign::new("other1", "https://example.com/b");
    shadowing.slug = Some("summer".to_string());
    assert!(matches!(
        storage.create_campaign(&shadowing).await,
        Err(StorageError::Conflict)
    ));

    // Once paused, the code is free again
    storage
        .set_campaign_status("summer", CampaignStatus::Paused)
        .await
        .unwrap();
    let reused = storage
        .create_campaign(&NewCampaign::new("summer", "https://example.com/c"))
        .await
        .unwrap();

    let found = storage.find_active_campaign("summer").await.unwrap().unwrap();
    assert_eq!(found.id, reused.id);
    assert_eq!(found.destination_url, "https://example.com/c");
}

#[tokio::test]
async fn test_duplicate_event_id_counts_once_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let storage = create_sqlite_storage(&dir).await;
    let campaign = storage
        .create_campaign(&NewCampaign::new("dedup1", "https://example.com"))
        .await
        .unwrap();

    let campaign_id = campaign.id;
    let mut handles = vec![];
    for _ in 0..5 {
        let storage = Arc::clone(&storage);
        handles.push(tokio::spawn(async move {
            storage.insert_scan(&scan(campaign_id, 7)).await
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            inserted += 1;
        }
    }

    assert_eq!(inserted, 1);
    let aggregates = storage.get_aggregates(campaign.id).await.unwrap();
    assert_eq!(aggregates[0].total_scans, 1);
}
