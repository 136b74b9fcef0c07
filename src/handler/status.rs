//! Health check and metrics endpoints

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::Response;

use crate::config::AppState;
use crate::http;
use crate::metrics;

const HEALTH_BODY: &str = r#"{"status": "OK"}"#;

/// `GET /`: count the call and report OK
pub fn health(state: &AppState) -> Response<Full<Bytes>> {
    state.requests.increment();
    http::build_json_response(HEALTH_BODY)
}

/// `GET /metrics`: Prometheus exposition of the request counter
pub fn metrics(state: &AppState) -> Response<Full<Bytes>> {
    http::build_ok_response(metrics::render(&state.requests), metrics::CONTENT_TYPE)
}
