//! Metrics definitions for Connect request authentication.
//!
//! All metrics follow Prometheus naming conventions:
//! - `connect_auth_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Every label is a `&'static str` drawn from a closed set:
//! - `policy`: context, request_bound, lifecycle
//! - `outcome`: success or an `AuthenticationError::kind()`
//! - `result`: hit, miss
//! - `status`: success, not_found, invalid, error, retry
//!
//! Tenant ids, key ids and account ids are never used as labels.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle served at `/metrics`.
///
/// Must be called before any metrics are recorded. Verification buckets are
/// sub-millisecond at the low end (HS256 path) and reach into seconds to
/// cover install-key fetches with a retry.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("connect_auth_verification_duration_seconds".to_string()),
            &[
                0.0005, 0.001, 0.0025, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
                2.500, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set verification buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Record the outcome of one token verification.
///
/// Metric: `connect_auth_verifications_total`, `connect_auth_verification_duration_seconds`
/// Labels: `policy`, `outcome`
pub fn record_verification(policy: &'static str, outcome: &'static str, duration: Duration) {
    histogram!("connect_auth_verification_duration_seconds",
        "policy" => policy
    )
    .record(duration.as_secs_f64());

    counter!("connect_auth_verifications_total",
        "policy" => policy,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record an install-key cache lookup.
///
/// Metric: `connect_auth_public_key_cache_total`
/// Labels: `result` (hit, miss)
pub fn record_public_key_cache(result: &'static str) {
    counter!("connect_auth_public_key_cache_total", "result" => result).increment(1);
}

/// Record one install-key fetch attempt.
///
/// Metric: `connect_auth_public_key_fetch_total`
/// Labels: `status`
pub fn record_public_key_fetch(status: &'static str) {
    counter!("connect_auth_public_key_fetch_total", "status" => status).increment(1);
}
