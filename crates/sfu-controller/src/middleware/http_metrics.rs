//! HTTP metrics middleware.
//!
//! Applied as the outermost layer so framework-level rejections (unknown
//! routes, malformed JSON, wrong content type) are counted too. The route
//! template is used as the endpoint label when the router matched one; raw
//! paths are normalized otherwise.

use crate::observability::metrics::{record_http_request, HttpInFlightGuard};
use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str)
        .to_string();
    let _in_flight = HttpInFlightGuard::enter();

    let response = next.run(request).await;

    record_http_request(&method, &endpoint, response.status().as_u16(), started.elapsed());
    response
}
