//! SFU controller error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Media
//! engine failures and internal errors are logged server-side and returned to
//! clients with a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// SFU controller error type.
///
/// Maps to HTTP status codes:
/// - NoAvailableNode: 503 Service Unavailable
/// - EndpointTimeout: 504 Gateway Timeout
/// - EndpointCreation, MediaNegotiation: 502 Bad Gateway
/// - RemoteNotPublishing, StaleEndpointRace, Conflict: 409 Conflict
/// - LoopbackNotAllowed, BadRequest: 400 Bad Request
/// - SessionClosing, SessionNotFound, ParticipantNotFound, StreamNotFound,
///   RecordingNotFound: 404 Not Found
/// - InvalidToken: 401 Unauthorized
/// - Forbidden: 403 Forbidden
/// - NotAllowed: 405 Method Not Allowed
/// - NotAcceptable: 406 Not Acceptable
/// - NotImplemented: 501 Not Implemented
/// - Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum SfuError {
    #[error("No media node available")]
    NoAvailableNode,

    #[error("Endpoint {0} did not become ready in time")]
    EndpointTimeout(String),

    #[error("Endpoint creation failed: {0}")]
    EndpointCreation(String),

    #[error("Media negotiation failed: {0}")]
    MediaNegotiation(String),

    #[error("Participant {0} is not publishing")]
    RemoteNotPublishing(String),

    #[error("Loopback subscription is not allowed")]
    LoopbackNotAllowed,

    #[error("Session {0} is closing")]
    SessionClosing(String),

    #[error("Session {0} not found")]
    SessionNotFound(String),

    #[error("Endpoint superseded by a concurrent operation")]
    StaleEndpointRace,

    #[error("Participant {0} not found")]
    ParticipantNotFound(String),

    #[error("Stream {0} not found")]
    StreamNotFound(String),

    #[error("Recording {0} not found")]
    RecordingNotFound(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not acceptable: {0}")]
    NotAcceptable(String),

    #[error("Not allowed: {0}")]
    NotAllowed(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SfuError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            SfuError::NoAvailableNode => 503,
            SfuError::EndpointTimeout(_) => 504,
            SfuError::EndpointCreation(_) | SfuError::MediaNegotiation(_) => 502,
            SfuError::RemoteNotPublishing(_)
            | SfuError::StaleEndpointRace
            | SfuError::Conflict(_) => 409,
            SfuError::LoopbackNotAllowed | SfuError::BadRequest(_) => 400,
            SfuError::SessionClosing(_)
            | SfuError::SessionNotFound(_)
            | SfuError::ParticipantNotFound(_)
            | SfuError::StreamNotFound(_)
            | SfuError::RecordingNotFound(_) => 404,
            SfuError::InvalidToken(_) => 401,
            SfuError::Forbidden(_) => 403,
            SfuError::NotAllowed(_) => 405,
            SfuError::NotAcceptable(_) => 406,
            SfuError::NotImplemented(_) => 501,
            SfuError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code sent to clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            SfuError::NoAvailableNode => "NO_AVAILABLE_NODE",
            SfuError::EndpointTimeout(_) => "ENDPOINT_TIMEOUT",
            SfuError::EndpointCreation(_) => "ENDPOINT_CREATION_ERROR",
            SfuError::MediaNegotiation(_) => "MEDIA_NEGOTIATION_ERROR",
            SfuError::RemoteNotPublishing(_) => "REMOTE_NOT_PUBLISHING",
            SfuError::LoopbackNotAllowed => "LOOPBACK_NOT_ALLOWED",
            SfuError::SessionClosing(_) => "SESSION_CLOSING",
            SfuError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            SfuError::StaleEndpointRace => "STALE_ENDPOINT_RACE",
            SfuError::ParticipantNotFound(_) => "PARTICIPANT_NOT_FOUND",
            SfuError::StreamNotFound(_) => "STREAM_NOT_FOUND",
            SfuError::RecordingNotFound(_) => "RECORDING_NOT_FOUND",
            SfuError::InvalidToken(_) => "INVALID_TOKEN",
            SfuError::Forbidden(_) => "FORBIDDEN",
            SfuError::BadRequest(_) => "BAD_REQUEST",
            SfuError::Conflict(_) => "CONFLICT",
            SfuError::NotAcceptable(_) => "NOT_ACCEPTABLE",
            SfuError::NotAllowed(_) => "NOT_ALLOWED",
            SfuError::NotImplemented(_) => "NOT_IMPLEMENTED",
            SfuError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to return to clients.
    ///
    /// Media engine and internal details are replaced with generic text.
    pub fn client_message(&self) -> String {
        match self {
            SfuError::NoAvailableNode => "No media server available, please try again".to_string(),
            SfuError::EndpointTimeout(_) => "Media endpoint was not ready in time".to_string(),
            SfuError::EndpointCreation(_) => "Media endpoint could not be created".to_string(),
            SfuError::MediaNegotiation(_) => "Media negotiation failed".to_string(),
            SfuError::StaleEndpointRace => "Endpoint was replaced, please retry".to_string(),
            SfuError::Internal(_) => "An internal error occurred".to_string(),
            SfuError::SessionClosing(id) => format!("Session {id} not found"),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for SfuError {
    fn into_response(self) -> Response {
        match &self {
            SfuError::EndpointCreation(detail) | SfuError::MediaNegotiation(detail) => {
                tracing::error!(target: "sfu.media", error = %detail, "Media engine operation failed");
            }
            SfuError::Internal(detail) => {
                tracing::error!(target: "sfu.internal", error = %detail, "Internal error");
            }
            SfuError::NoAvailableNode => {
                tracing::warn!(target: "sfu.availability", "No running media node for request");
            }
            _ => {}
        }

        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}
