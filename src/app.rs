use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::config::{ClientIpConfig, RedirectConfig};
use crate::redirect;
use crate::storage::Storage;
use crate::tracking::Tracker;

/// Shared by the redirect and bridge API routers
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub tracker: Arc<Tracker>,
    pub redirect: RedirectConfig,
    pub client_ip: ClientIpConfig,
}

/// Scan entry point, bridge page, bridge API and health check on one router
pub fn create_app(state: Arc<AppState>) -> Router {
    redirect::create_redirect_router(Arc::clone(&state))
        .merge(api::create_api_router(state))
        .layer(TraceLayer::new_for_http())
}
