//! Liveness endpoint.

use axum::Json;
use serde::Serialize;
use tracing::instrument;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Handler for GET /v1/health
///
/// The service has no hard dependency to probe: the tenant store is in
/// process and install keys are fetched lazily.
#[instrument(skip_all, name = "connect.health.check")]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}
