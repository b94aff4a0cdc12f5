pub mod campaign;
pub mod scan;

pub use campaign::{
    Campaign, CampaignRow, CampaignStatus, CookieDuration, NewCampaign, PixelCredential,
    DEFAULT_BRIDGE_DURATION_MS,
};
pub use scan::{AggregateBucket, NewScan, ScanAggregate, ScanRecord};
