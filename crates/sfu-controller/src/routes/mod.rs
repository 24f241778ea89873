//! HTTP routes for the SFU controller.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::session::SessionManager;
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Upper bound on any REST request, endpoint waits included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub config: Config,
}

/// Build the REST API router.
///
/// Layer order (bottom-to-top execution): timeout, trace, then HTTP metrics
/// as the outermost layer so every response is counted.
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/api/sessions/:id",
            get(handlers::get_session).delete(handlers::close_session),
        )
        .route(
            "/api/sessions/:id/connection",
            post(handlers::publish_external_feed),
        )
        .route(
            "/api/sessions/:id/connection/:connection_id",
            delete(handlers::delete_connection),
        )
        .route(
            "/api/sessions/:id/stream/:stream_id",
            delete(handlers::delete_stream),
        )
        .route("/api/tokens", post(handlers::issue_token))
        .route("/api/signal", post(handlers::send_signal))
        .route("/api/recordings/start", post(handlers::start_recording))
        .route("/api/recordings/stop/:id", post(handlers::stop_recording))
        .route("/api/media-nodes", get(handlers::list_media_nodes))
        .route("/api/config", get(handlers::get_config))
        .route("/api/config/version", get(handlers::get_version))
        .route("/api/config/public-url", get(handlers::get_public_url))
        .route("/api/config/recording", get(handlers::get_recording_enabled))
        .route("/api/config/cdr", get(handlers::get_cdr_enabled))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(middleware::from_fn(http_metrics_middleware))
}
