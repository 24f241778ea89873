//! HTTP request handlers for the REST API.

pub mod config;
pub mod media_nodes;
pub mod recordings;
pub mod sessions;
pub mod signal;
pub mod tokens;

pub use config::{
    get_cdr_enabled, get_config, get_public_url, get_recording_enabled, get_version,
};
pub use media_nodes::list_media_nodes;
pub use recordings::{start_recording, stop_recording};
pub use sessions::{
    close_session, create_session, delete_connection, delete_stream, get_session, list_sessions,
    publish_external_feed,
};
pub use signal::send_signal;
pub use tokens::issue_token;

use crate::errors::SfuError;
use axum::body::Bytes;
use serde::de::DeserializeOwned;

/// Deserialize a JSON body by hand so type errors surface as 400 in the
/// shared error format instead of Axum's 422. An empty body reads as the
/// request type's default.
pub(crate) fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, SfuError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(target: "sfu.api", error = %e, "Invalid request body");
        SfuError::BadRequest(format!("Invalid request body: {e}"))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{CreateSessionRequest, SignalRequest};

    #[test]
    fn test_empty_body_is_default() {
        let request: CreateSessionRequest = parse_body(&Bytes::from_static(b"")).unwrap();
        assert!(request.media_mode.is_none());
        let request: CreateSessionRequest = parse_body(&Bytes::from_static(b" \n")).unwrap();
        assert!(request.custom_session_id.is_none());
    }

    #[test]
    fn test_type_error_is_bad_request() {
        let result: Result<SignalRequest, _> =
            parse_body(&Bytes::from_static(br#"{"session": 42}"#));
        assert!(matches!(result, Err(SfuError::BadRequest(_))));
    }
}
