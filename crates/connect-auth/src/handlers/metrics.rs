//! Prometheus metrics endpoint handler.
//!
//! # Security
//!
//! Unauthenticated so Prometheus can scrape it. Labels are bounded and never
//! contain client keys, key ids or account ids.

use axum::{extract::State, response::IntoResponse};
use metrics_exporter_prometheus::PrometheusHandle;

/// Handler for GET /metrics
#[tracing::instrument(skip_all, name = "connect.metrics.scrape")]
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    handle.render()
}
