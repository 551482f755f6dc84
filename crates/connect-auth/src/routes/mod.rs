//! HTTP routes for the Connect auth service.
//!
//! Defines the Axum router and application state.

use crate::auth::ConnectVerifier;
use crate::handlers;
use crate::middleware::{require_lifecycle_token, AuthState};
use crate::tenants::TenantRegistry;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<ConnectVerifier>,

    /// Write side of the tenant store, used by lifecycle callbacks.
    pub registry: Arc<dyn TenantRegistry>,
}

/// Build the application routes.
///
/// - `/v1/health` - liveness (public)
/// - `/metrics` - Prometheus scrape (public)
/// - `/lifecycleEvents/installed`, `/lifecycleEvents/uninstalled` -
///   Atlassian-signed lifecycle callbacks
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        verifier: state.verifier.clone(),
    });

    let public_routes = Router::new().route("/v1/health", get(handlers::health_check));

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let lifecycle_routes = Router::new()
        .route("/lifecycleEvents/installed", post(handlers::installed))
        .route("/lifecycleEvents/uninstalled", post(handlers::uninstalled))
        .route_layer(middleware::from_fn_with_state(
            auth_state,
            require_lifecycle_token,
        ))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    public_routes
        .merge(metrics_routes)
        .merge(lifecycle_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}
