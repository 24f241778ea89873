//! `POST /api/tokens` - Issue a join token.

use super::parse_body;
use crate::errors::SfuError;
use crate::models::{parse_wire_enum, Role, TokenRequest, TokenResponse};
use crate::routes::AppState;
use axum::{body::Bytes, extract::State, Json};
use common::secret::ExposeSecret;
use common::types::SessionId;
use std::sync::Arc;
use tracing::instrument;

#[instrument(skip_all, name = "sfu.api.issue_token", fields(method = "POST", endpoint = "/api/tokens"))]
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<TokenResponse>, SfuError> {
    let request: TokenRequest = parse_body(&body)?;
    let session_id = request
        .session
        .filter(|s| !s.is_empty())
        .map(SessionId::new)
        .ok_or_else(|| SfuError::BadRequest("\"session\" parameter is mandatory".to_string()))?;
    let role: Role = match request.role.as_deref() {
        Some(role) => parse_wire_enum("role", role)?,
        None => Role::default(),
    };
    let data = request.data.unwrap_or_default();

    let token = state
        .manager
        .issue_token(&session_id, role, &data, request.kurento_options)?;
    let value = token.value.expose_secret().to_string();
    Ok(Json(TokenResponse {
        id: value.clone(),
        session: session_id.to_string(),
        role: token.role,
        data: token.server_data,
        token: value,
        kurento_options: token.options,
    }))
}
