//! HTTP surface.

pub mod health;
pub mod metrics;
pub mod status;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::index::ImageIndex;
use crate::metrics::AppMetrics;
use crate::scheduler::MenuScheduler;

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<MenuScheduler>,
    pub index: Arc<ImageIndex>,
    pub metrics: Arc<AppMetrics>,
}

/// Assemble the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/status", get(status::status))
        .route("/send-now", post(status::send_now))
        .route("/metrics", get(metrics::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
