//! Sends conversion events to the ad platform
//!
//! Delivery is best effort: one attempt, no retries. A non-2xx response or a
//! transport error is logged and the event dropped.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::credentials::{resolve_pixel_target, PixelTarget};
use super::payload::{ConversionPayload, VisitorContext};
use crate::config::ConversionConfig;
use crate::geo::GeoResult;
use crate::models::{Campaign, PixelCredential};
use crate::privacy::{CredentialCipher, CryptoError};

#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn send(&self, target: &PixelTarget, payload: &ConversionPayload) -> Result<()>;
}

/// Graph API conversions endpoint: `POST {api_url}/{version}/{pixel_id}/events`
pub struct GraphApiTransport {
    client: Client,
    api_url: String,
    api_version: String,
}

impl GraphApiTransport {
    pub fn from_config(config: &ConversionConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("scanlink/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to build HTTP client for conversion events")?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
        })
    }

    fn endpoint(&self, pixel_id: &str) -> String {
        format!("{}/{}/{}/events", self.api_url, self.api_version, pixel_id)
    }
}

#[async_trait]
impl EventTransport for GraphApiTransport {
    async fn send(&self, target: &PixelTarget, payload: &ConversionPayload) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint(&target.pixel_id))
            .bearer_auth(&target.access_token)
            .json(payload)
            .send()
            .await
            .context("conversion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            bail!("conversion endpoint returned {status}: {snippet}");
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// No pixel or no token configured
    Skipped,
    /// Transport error or non-2xx, already logged
    Failed,
}

pub struct ConversionDispatcher {
    transport: Arc<dyn EventTransport>,
    cipher: Option<Arc<CredentialCipher>>,
    event_name: String,
    test_event_code: Option<String>,
}

impl ConversionDispatcher {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        cipher: Option<Arc<CredentialCipher>>,
        event_name: impl Into<String>,
        test_event_code: Option<String>,
    ) -> Self {
        Self {
            transport,
            cipher,
            event_name: event_name.into(),
            test_event_code,
        }
    }

    pub fn from_config(config: &ConversionConfig, cipher: Option<Arc<CredentialCipher>>) -> Result<Self> {
        let transport = GraphApiTransport::from_config(config)?;
        Ok(Self::new(
            Arc::new(transport),
            cipher,
            config.event_name.clone(),
            config.test_event_code.clone(),
        ))
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Build and send the event for one visit.
    ///
    /// Only a credential that cannot be decrypted is returned as an error;
    /// the caller logs it and the event for this campaign is skipped.
    pub async fn dispatch(
        &self,
        campaign: &Campaign,
        account: Option<&PixelCredential>,
        geo: &GeoResult,
        visitor: &VisitorContext,
    ) -> Result<DispatchOutcome, CryptoError> {
        let Some(target) = resolve_pixel_target(&campaign.pixel, account, self.cipher.as_deref())? else {
            debug!(campaign_id = campaign.id, "no conversion pixel configured, skipping");
            return Ok(DispatchOutcome::Skipped);
        };

        let payload = ConversionPayload::build(
            &self.event_name,
            campaign,
            geo,
            visitor,
            self.test_event_code.as_deref(),
        );

        match self.transport.send(&target, &payload).await {
            Ok(()) => {
                debug!(
                    campaign_id = campaign.id,
                    event_id = %visitor.event_id,
                    level = target.level.as_str(),
                    "conversion event sent"
                );
                Ok(DispatchOutcome::Sent)
            }
            Err(e) => {
                warn!(
                    campaign_id = campaign.id,
                    event_id = %visitor.event_id,
                    "conversion event dropped: {e:#}"
                );
                Ok(DispatchOutcome::Failed)
            }
        }
    }
}
