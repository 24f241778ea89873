//! Recording handlers.
//!
//! - `POST /api/recordings/start` - Start a session recording
//! - `POST /api/recordings/stop/{recordingId}` - Stop a recording

use super::parse_body;
use crate::errors::SfuError;
use crate::models::{RecordingInfo, StartRecordingRequest};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use tracing::instrument;

#[instrument(skip_all, name = "sfu.api.start_recording", fields(method = "POST", endpoint = "/api/recordings/start"))]
pub async fn start_recording(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<RecordingInfo>, SfuError> {
    let request: StartRecordingRequest = parse_body(&body)?;
    Ok(Json(state.manager.start_recording(request).await?))
}

#[instrument(skip_all, name = "sfu.api.stop_recording", fields(method = "POST", recording_id = %id))]
pub async fn stop_recording(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RecordingInfo>, SfuError> {
    Ok(Json(state.manager.stop_recording(&id).await?))
}
