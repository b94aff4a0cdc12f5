use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::NewScan;
use crate::storage::Storage;

/// Appends scans. Failures are logged here and never reach the caller.
#[derive(Clone)]
pub struct ScanRecorder {
    storage: Arc<dyn Storage>,
}

impl ScanRecorder {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Insert and wait; returns whether a new row was written. Runs on the
    /// detached enrichment task, so the request never waits on it.
    pub async fn record_now(&self, scan: NewScan) -> bool {
        match self.storage.insert_scan(&scan).await {
            Ok(true) => {
                debug!(campaign_id = scan.campaign_id, event_id = %scan.event_id, "scan recorded");
                true
            }
            Ok(false) => {
                debug!(event_id = %scan.event_id, "scan already recorded for event");
                false
            }
            Err(e) => {
                warn!(
                    campaign_id = scan.campaign_id,
                    event_id = %scan.event_id,
                    "failed to record scan: {e:#}"
                );
                false
            }
        }
    }
}
