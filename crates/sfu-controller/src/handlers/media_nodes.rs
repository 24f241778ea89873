//! `GET /api/media-nodes` - Media nodes ranked by load.

use crate::models::{ListResponse, MediaNodeInfo};
use crate::routes::AppState;
use axum::{extract::State, Json};
use std::sync::Arc;

pub async fn list_media_nodes(
    State(state): State<Arc<AppState>>,
) -> Json<ListResponse<MediaNodeInfo>> {
    Json(ListResponse::new(state.manager.node_load_ranking()))
}
