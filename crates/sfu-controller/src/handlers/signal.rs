//! `POST /api/signal` - Send an application signal to participants.

use super::parse_body;
use crate::errors::SfuError;
use crate::models::SignalRequest;
use crate::routes::AppState;
use axum::{body::Bytes, extract::State, http::StatusCode};
use std::sync::Arc;
use tracing::instrument;

#[instrument(skip_all, name = "sfu.api.send_signal", fields(method = "POST", endpoint = "/api/signal"))]
pub async fn send_signal(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<StatusCode, SfuError> {
    let request: SignalRequest = parse_body(&body)?;
    state.manager.send_signal(request)?;
    Ok(StatusCode::OK)
}
