use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};

use super::AppState;
use crate::error::AppError;

pub async fn metrics(State(state): State<AppState>) -> Result<Response, AppError> {
    let body = state.metrics.render()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}
