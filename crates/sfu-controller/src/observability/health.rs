//! Health endpoints for the SFU controller.
//!
//! - `GET /health` - Liveness probe, 200 while the process serves requests
//! - `GET /ready` - Readiness probe, 200 while at least one media node is
//!   running and the controller is not draining
//!
//! The `/metrics` endpoint is merged into the same router by `main`.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Readiness inputs: the running node count published by the node monitor
/// and the draining flag raised on shutdown.
#[derive(Debug, Default)]
pub struct HealthState {
    running_nodes: AtomicUsize,
    draining: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStatus {
    Ready,
    NoRunningNodes,
    Draining,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadinessBody {
    status: ReadinessStatus,
    running_nodes: usize,
}

impl HealthState {
    /// No running nodes, not draining.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running_nodes(&self, count: usize) {
        self.running_nodes.store(count, Ordering::SeqCst);
    }

    /// Report not ready from now on, whatever the node count.
    pub fn begin_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn running_nodes(&self) -> usize {
        self.running_nodes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn readiness(&self) -> ReadinessStatus {
        if self.draining.load(Ordering::SeqCst) {
            ReadinessStatus::Draining
        } else if self.running_nodes() == 0 {
            ReadinessStatus::NoRunningNodes
        } else {
            ReadinessStatus::Ready
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.readiness() == ReadinessStatus::Ready
    }
}

pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<ReadinessBody>) {
    let status = state.readiness();
    let code = if status == ReadinessStatus::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(ReadinessBody {
            status,
            running_nodes: state.running_nodes(),
        }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    #[test]
    fn test_readiness_transitions() {
        let state = HealthState::new();
        assert_eq!(state.readiness(), ReadinessStatus::NoRunningNodes);

        state.set_running_nodes(2);
        assert!(state.is_ready());

        state.begin_draining();
        assert_eq!(state.readiness(), ReadinessStatus::Draining);
        state.set_running_nodes(3);
        assert!(!state.is_ready());
    }

    #[tokio::test]
    async fn test_ready_reports_running_nodes() {
        let state = Arc::new(HealthState::new());
        let app = health_router(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "no_running_nodes");

        state.set_running_nodes(1);
        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["runningNodes"], 1);
    }
}
