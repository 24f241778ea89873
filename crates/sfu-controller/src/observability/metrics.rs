//! Metrics definitions for the SFU controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sfu_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: HTTP methods
//! - `endpoint`: parameterized paths, unknown paths collapse to `/other`
//! - `kind`: `publisher`, `subscriber`
//! - `operation`: bounded by the media engine calls issued
//! - `node_id`: one value per configured media node

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to serve
/// `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("sfu_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.200, 0.500, 1.000, 2.000, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Endpoint creation waits on a media node round trip or two
        .set_buckets_for_metric(
            Matcher::Prefix("sfu_endpoint_creation".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000, 30.000,
            ],
        )
        .map_err(|e| format!("Failed to set endpoint creation buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `sfu_http_requests_total`, `sfu_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("sfu_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("sfu_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Holds `sfu_http_requests_in_flight` up for as long as it lives.
pub struct HttpInFlightGuard(());

impl HttpInFlightGuard {
    #[must_use]
    pub fn enter() -> Self {
        gauge!("sfu_http_requests_in_flight").increment(1.0);
        Self(())
    }
}

impl Drop for HttpInFlightGuard {
    fn drop(&mut self) {
        gauge!("sfu_http_requests_in_flight").decrement(1.0);
    }
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Replace session, connection and stream ids with placeholders.
fn normalize_endpoint(path: &str) -> String {
    // Route templates (`/api/sessions/:id`) and raw paths normalize alike
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let normalized = match segments.as_slice() {
        ["health"] | ["ready"] | ["metrics"] => return path.to_string(),
        ["api", "sessions"] => "/api/sessions",
        ["api", "sessions", _] => "/api/sessions/{id}",
        ["api", "sessions", _, "connection"] => "/api/sessions/{id}/connection",
        ["api", "sessions", _, "connection", _] => "/api/sessions/{id}/connection/{connection}",
        ["api", "sessions", _, "stream", _] => "/api/sessions/{id}/stream/{stream}",
        ["api", "tokens"] => "/api/tokens",
        ["api", "signal"] => "/api/signal",
        ["api", "recordings", "start"] => "/api/recordings/start",
        ["api", "recordings", "stop", _] => "/api/recordings/stop/{id}",
        ["api", "media-nodes"] => "/api/media-nodes",
        _ => "/other",
    };
    normalized.to_string()
}

// ============================================================================
// Media Metrics
// ============================================================================

/// Record the outcome of building a media endpoint.
///
/// Metric: `sfu_endpoint_creation_duration_seconds`, `sfu_endpoint_creations_total`
/// Labels: `kind`, `outcome` (`success`, `late`, `error`)
pub fn record_endpoint_creation(kind: &str, outcome: &str, duration: Duration) {
    histogram!("sfu_endpoint_creation_duration_seconds",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("sfu_endpoint_creations_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a media engine error by operation and classification.
///
/// Metric: `sfu_media_engine_errors_total`
/// Labels: `operation`, `class` (`benign`, `fatal`)
pub fn record_media_engine_error(operation: &str, class: &str) {
    counter!("sfu_media_engine_errors_total",
        "operation" => operation.to_string(),
        "class" => class.to_string()
    )
    .increment(1);
}

// ============================================================================
// Cluster Metrics
// ============================================================================

/// Metric: `sfu_node_selections_total`
/// Labels: `status` (`selected`, `no_available_node`)
pub fn record_node_selection(status: &str) {
    counter!("sfu_node_selections_total", "status" => status.to_string()).increment(1);
}

/// Metric: `sfu_node_load`
/// Labels: `node_id`
pub fn set_node_load(node_id: &str, load: f64) {
    gauge!("sfu_node_load", "node_id" => node_id.to_string()).set(load);
}

/// Metric: `sfu_node_events_total`
/// Labels: `event`
pub fn record_node_event(event: &str) {
    counter!("sfu_node_events_total", "event" => event.to_string()).increment(1);
}

// ============================================================================
// Session Metrics
// ============================================================================

/// Metric: `sfu_sessions`
/// Labels: `state` (`active`, `not_active`)
#[allow(clippy::cast_precision_loss)]
pub fn set_session_gauges(active: usize, not_active: usize) {
    gauge!("sfu_sessions", "state" => "active").set(active as f64);
    gauge!("sfu_sessions", "state" => "not_active").set(not_active as f64);
}

/// Metric: `sfu_cdr_failures_total`
/// Labels: `event`
pub fn record_cdr_failure(event: &str) {
    counter!("sfu_cdr_failures_total", "event" => event.to_string()).increment(1);
}
