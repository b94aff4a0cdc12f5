//! What to do with one scan, decided before any side effect runs

use crate::device::is_bot;
use crate::models::Campaign;
use crate::privacy::generate_event_id;

#[derive(Debug, Clone, PartialEq)]
pub enum RedirectDecision {
    /// Unknown, paused or archived code: send to the default page
    NotFound,
    /// Crawler or link-preview fetch: plain redirect, no cookies, no tracking
    BotShortCircuit { destination: String },
    /// 307 to the bridge page, which runs enrichment itself
    Bridge { campaign: Campaign, event_id: String },
    /// 302 to the destination with enrichment detached in the background
    Direct { campaign: Campaign, event_id: String },
}

impl RedirectDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedirectDecision::NotFound => "not_found",
            RedirectDecision::BotShortCircuit { .. } => "bot",
            RedirectDecision::Bridge { .. } => "bridge",
            RedirectDecision::Direct { .. } => "direct",
        }
    }
}

pub fn decide(campaign: Option<Campaign>, user_agent: &str) -> RedirectDecision {
    let Some(campaign) = campaign.filter(Campaign::is_active) else {
        return RedirectDecision::NotFound;
    };

    if is_bot(user_agent) {
        return RedirectDecision::BotShortCircuit {
            destination: campaign.destination_url,
        };
    }

    // Minted once here so the bridge URL, the cookies and the server-side
    // event all carry the same dedup id
    let event_id = generate_event_id();

    if campaign.bridge_enabled {
        RedirectDecision::Bridge { campaign, event_id }
    } else {
        RedirectDecision::Direct { campaign, event_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CampaignStatus, CookieDuration, PixelCredential};
    use crate::privacy::is_event_id;

    const IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 Mobile/15E148 Safari/604.1";

    fn campaign(bridge_enabled: bool) -> Campaign {
        Campaign {
            id: 3,
            owner_id: None,
            name: "Menu".to_string(),
            short_code: "menu".to_string(),
            slug: None,
            destination_url: "https://example.com/menu".to_string(),
            cookie_duration: CookieDuration::OneDay,
            bridge_enabled,
            bridge_duration_ms: 800,
            status: CampaignStatus::Active,
            pixel: PixelCredential::default(),
            created_at: 0,
        }
    }

    #[test]
    fn test_missing_campaign() {
        assert_eq!(decide(None, IPHONE), RedirectDecision::NotFound);
    }

    #[test]
    fn test_inactive_campaign_is_not_found() {
        let mut paused = campaign(false);
        paused.status = CampaignStatus::Paused;
        assert_eq!(decide(Some(paused), IPHONE), RedirectDecision::NotFound);
    }

    #[test]
    fn test_bot_short_circuits_before_bridge() {
        let decision = decide(
            Some(campaign(true)),
            "Mozilla/5.0 (compatible; Googlebot/2.1; +http://www.google.com/bot.html)",
        );
        assert_eq!(
            decision,
            RedirectDecision::BotShortCircuit {
                destination: "https://example.com/menu".to_string()
            }
        );
    }

    #[test]
    fn test_bridge_and_direct() {
        match decide(Some(campaign(true)), IPHONE) {
            RedirectDecision::Bridge { event_id, .. } => assert!(is_event_id(&event_id)),
            other => panic!("expected bridge, got {other:?}"),
        }
        match decide(Some(campaign(false)), IPHONE) {
            RedirectDecision::Direct { campaign, event_id } => {
                assert_eq!(campaign.id, 3);
                assert!(is_event_id(&event_id));
            }
            other => panic!("expected direct, got {other:?}"),
        }
    }
}
