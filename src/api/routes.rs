use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::app::AppState;

use super::handlers::{campaign_display, track_scan};

pub fn create_api_router(state: Arc<AppState>) -> Router {
    let prefix = state.redirect.api_prefix.clone();

    Router::new()
        .route(&format!("{prefix}/{{code}}"), get(campaign_display))
        .route(&format!("{prefix}/{{code}}/track"), post(track_scan))
        .with_state(state)
}
