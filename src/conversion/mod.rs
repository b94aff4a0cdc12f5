//! Server-side conversion events for the ad-attribution platform

pub mod credentials;
pub mod dispatcher;
pub mod payload;

pub use credentials::{resolve_pixel_target, CredentialLevel, PixelTarget};
pub use dispatcher::{ConversionDispatcher, DispatchOutcome, EventTransport, GraphApiTransport};
pub use payload::{ConversionPayload, VisitorContext};
