//! Background enrichment of a served scan: geolocate, then send the
//! conversion event and append the scan record side by side.
//!
//! Nothing in here can fail the request that triggered it. Every error is
//! logged at the task boundary and dropped.

pub mod context;
pub mod recorder;

pub use context::{correlation_cookies, header_str, ScanContext};
pub use recorder::ScanRecorder;

use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, warn};

use crate::conversion::ConversionDispatcher;
use crate::geo::{GeoResolver, GeoResult};
use crate::models::{Campaign, PixelCredential};
use crate::privacy::IpHasher;
use crate::storage::Storage;

pub struct Tracker {
    storage: Arc<dyn Storage>,
    geo: Arc<GeoResolver>,
    dispatcher: Arc<ConversionDispatcher>,
    recorder: ScanRecorder,
    hasher: IpHasher,
}

impl Tracker {
    pub fn new(
        storage: Arc<dyn Storage>,
        geo: Arc<GeoResolver>,
        dispatcher: Arc<ConversionDispatcher>,
        hasher: IpHasher,
    ) -> Self {
        Self {
            recorder: ScanRecorder::new(Arc::clone(&storage)),
            storage,
            geo,
            dispatcher,
            hasher,
        }
    }

    pub fn geo(&self) -> &GeoResolver {
        &self.geo
    }

    pub fn event_name(&self) -> &str {
        self.dispatcher.event_name()
    }

    /// Start enrichment on a detached task.
    ///
    /// The receiver yields the resolved location as soon as it is known, ahead
    /// of dispatch and recording. Dropping it does not cancel the task.
    pub fn spawn(self: &Arc<Self>, ctx: ScanContext) -> oneshot::Receiver<GeoResult> {
        let (tx, rx) = oneshot::channel();
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tracker.enrich(ctx, Some(tx)).await;
        });
        rx
    }

    /// Run enrichment to completion on the current task
    pub async fn enrich(&self, ctx: ScanContext, geo_tx: Option<oneshot::Sender<GeoResult>>) -> GeoResult {
        let geo = self.geo.resolve(ctx.client_ip, ctx.fallback_geo.clone()).await;

        if let Some(tx) = geo_tx {
            // Receiver gone means the caller stopped waiting; carry on
            let _ = tx.send(geo.clone());
        }

        let scan = ctx.new_scan(&geo, &self.hasher);
        tokio::join!(self.send_conversion(&ctx, &geo), self.recorder.record_now(scan));

        geo
    }

    /// Owner's fallback pixel, looked up only when the campaign cannot
    /// dispatch on its own
    pub async fn account_pixel(&self, campaign: &Campaign) -> Option<PixelCredential> {
        if campaign.pixel.is_dispatchable() {
            return None;
        }
        let owner_id = campaign.owner_id.as_deref()?;

        match self.storage.get_account_pixel(owner_id).await {
            Ok(pixel) => pixel,
            Err(e) => {
                warn!(owner_id, "failed to load account pixel: {e:#}");
                None
            }
        }
    }

    async fn send_conversion(&self, ctx: &ScanContext, geo: &GeoResult) {
        let account = self.account_pixel(&ctx.campaign).await;
        let visitor = ctx.visitor_context();

        if let Err(e) = self
            .dispatcher
            .dispatch(&ctx.campaign, account.as_ref(), geo, &visitor)
            .await
        {
            error!(
                campaign_id = ctx.campaign.id,
                event_id = %ctx.event_id,
                "conversion credential unusable, event skipped: {e}"
            );
        }
    }
}
