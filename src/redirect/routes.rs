use axum::{middleware, routing::get, Router};
use std::sync::Arc;

use crate::app::AppState;

use super::handlers::{bridge_page, health_check, redirect_scan};
use super::middleware::record_request_start;

pub fn create_redirect_router(state: Arc<AppState>) -> Router {
    let prefix = state.redirect.redirect_prefix.clone();

    Router::new()
        .route("/health", get(health_check))
        .route(&format!("{prefix}/{{code}}"), get(redirect_scan))
        .route(&format!("{prefix}/{{code}}/bridge"), get(bridge_page))
        .layer(middleware::from_fn(record_request_start))
        .with_state(state)
}
