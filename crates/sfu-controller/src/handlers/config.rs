//! `GET /api/config` and its single-value views.

use crate::models::ServerConfigInfo;
use crate::routes::AppState;
use axum::{extract::State, Json};
use std::sync::Arc;
use tracing::instrument;

#[instrument(skip_all, name = "sfu.api.get_config", fields(method = "GET", endpoint = "/api/config"))]
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ServerConfigInfo> {
    let config = &state.config;
    Json(ServerConfigInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        public_url: config.ws_url.clone(),
        media_nodes: config.media_node_uris.len(),
        recording: config.recording_enabled,
        cdr: config.cdr_enabled,
        empty_session_policy: config.empty_session_policy.as_str().to_string(),
        endpoint_timeout_seconds: config.endpoint_timeout_seconds,
    })
}

pub async fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub async fn get_public_url(State(state): State<Arc<AppState>>) -> String {
    state.config.ws_url.clone()
}

pub async fn get_recording_enabled(State(state): State<Arc<AppState>>) -> Json<bool> {
    Json(state.config.recording_enabled)
}

pub async fn get_cdr_enabled(State(state): State<Arc<AppState>>) -> Json<bool> {
    Json(state.config.cdr_enabled)
}
