//! Status and on-demand send endpoints.

use axum::{
    extract::State,
    http::{header, HeaderValue},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::scheduler::{SchedulerStatus, SendNowResult};

/// `GET /status` body: scheduler state plus the index's last scan time.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub scheduler: SchedulerStatus,
    pub last_scan: Option<DateTime<Utc>>,
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let body = StatusResponse {
        scheduler: state.scheduler.status(),
        last_scan: state.index.last_scan_time(),
    };
    (
        [(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        Json(body),
    )
}

pub async fn send_now(State(state): State<AppState>) -> Json<SendNowResult> {
    tracing::info!("Manual send requested");
    Json(state.scheduler.send_now().await)
}
