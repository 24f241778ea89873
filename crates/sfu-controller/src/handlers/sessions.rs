//! Session handlers.
//!
//! - `POST /api/sessions` - Create session
//! - `GET /api/sessions` - List sessions
//! - `GET /api/sessions/{id}` - Get session
//! - `DELETE /api/sessions/{id}` - Close session
//! - `POST /api/sessions/{id}/connection` - Publish an external feed
//! - `DELETE /api/sessions/{id}/connection/{connectionId}` - Evict participant
//! - `DELETE /api/sessions/{id}/stream/{streamId}` - Force-unpublish stream

use super::parse_body;
use crate::errors::SfuError;
use crate::models::{
    CreateSessionRequest, EndReason, ExternalFeedRequest, ListResponse, ParticipantInfo,
    SessionCreatedResponse, SessionInfo,
};
use crate::routes::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use common::types::{ParticipantPublicId, SessionId, StreamId};
use std::sync::Arc;
use tracing::instrument;

/// On sub-resource routes a missing session is the caller's fault.
fn session_as_bad_request(e: SfuError) -> SfuError {
    match e {
        SfuError::SessionNotFound(id) => SfuError::BadRequest(format!("Session {id} not found")),
        other => other,
    }
}

#[instrument(skip_all, name = "sfu.api.create_session", fields(method = "POST", endpoint = "/api/sessions"))]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SessionCreatedResponse>, SfuError> {
    let request: CreateSessionRequest = parse_body(&body)?;
    let session = state.manager.create_session(request.into_properties()?)?;
    Ok(Json(SessionCreatedResponse {
        id: session.id().to_string(),
        created_at: session.created_at_ms(),
    }))
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<ListResponse<SessionInfo>> {
    let content = state
        .manager
        .sessions()
        .iter()
        .map(|s| state.manager.session_info(s))
        .collect();
    Json(ListResponse::new(content))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, SfuError> {
    let session = state.manager.session(&SessionId::new(id))?;
    Ok(Json(state.manager.session_info(&session)))
}

#[instrument(skip_all, name = "sfu.api.close_session", fields(method = "DELETE", session_id = %id))]
pub async fn close_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, SfuError> {
    state
        .manager
        .close_session(&SessionId::new(id), EndReason::SessionClosedByServer)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all, name = "sfu.api.publish_external_feed", fields(method = "POST", session_id = %id))]
pub async fn publish_external_feed(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<ParticipantInfo>, SfuError> {
    let request: ExternalFeedRequest = parse_body(&body)?;
    let info = state
        .manager
        .publish_external_feed(&SessionId::new(id), request)
        .await?;
    Ok(Json(info))
}

#[instrument(skip_all, name = "sfu.api.delete_connection", fields(method = "DELETE", session_id = %id, connection_id = %connection_id))]
pub async fn delete_connection(
    State(state): State<Arc<AppState>>,
    Path((id, connection_id)): Path<(String, String)>,
) -> Result<StatusCode, SfuError> {
    state
        .manager
        .evict_participant(
            &SessionId::new(id),
            &ParticipantPublicId::new(connection_id),
        )
        .await
        .map_err(session_as_bad_request)?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all, name = "sfu.api.delete_stream", fields(method = "DELETE", session_id = %id, stream_id = %stream_id))]
pub async fn delete_stream(
    State(state): State<Arc<AppState>>,
    Path((id, stream_id)): Path<(String, String)>,
) -> Result<StatusCode, SfuError> {
    state
        .manager
        .unpublish_stream(&SessionId::new(id), &StreamId::new(stream_id))
        .await
        .map_err(session_as_bad_request)?;
    Ok(StatusCode::NO_CONTENT)
}
