//! Connect lifecycle callbacks.
//!
//! Both routes sit behind `require_lifecycle_token`, so the handlers receive
//! the verified `iss` as a [`VerifiedInstallation`]. The payload's
//! `clientKey` must match it: a tenant can only ever (re)install or remove
//! itself.

use crate::auth::VerifiedInstallation;
use crate::errors::ApiError;
use crate::routes::AppState;
use crate::tenants::InstallRegistration;
use axum::{extract::State, http::StatusCode, Extension, Json};
use secrecy::SecretString;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// Body Atlassian posts to lifecycle callbacks. Unknown fields are ignored.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecyclePayload {
    #[serde(default)]
    pub event_type: Option<String>,

    pub client_key: String,

    #[serde(default)]
    pub shared_secret: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub display_url: Option<String>,
}

impl fmt::Debug for LifecyclePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecyclePayload")
            .field("event_type", &self.event_type)
            .field("client_key", &self.client_key)
            .field("shared_secret", &self.shared_secret.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("display_url", &self.display_url)
            .finish()
    }
}

fn ensure_same_tenant(
    installation: &VerifiedInstallation,
    payload: &LifecyclePayload,
) -> Result<(), ApiError> {
    if payload.client_key != installation.client_key {
        return Err(ApiError::Forbidden(format!(
            "payload clientKey {} does not match token issuer {}",
            payload.client_key, installation.client_key
        )));
    }
    Ok(())
}

fn ensure_event(payload: &LifecyclePayload, expected: &str) -> Result<(), ApiError> {
    match payload.event_type.as_deref() {
        None => Ok(()),
        Some(event) if event == expected => Ok(()),
        Some(event) => Err(ApiError::BadRequest(format!(
            "eventType must be {expected}, got {event}"
        ))),
    }
}

fn into_registration(payload: LifecyclePayload) -> Result<InstallRegistration, ApiError> {
    let shared_secret = payload
        .shared_secret
        .filter(|secret| !secret.is_empty())
        .ok_or_else(|| ApiError::BadRequest("sharedSecret is required".to_string()))?;

    let base_url = payload
        .base_url
        .ok_or_else(|| ApiError::BadRequest("baseUrl is required".to_string()))?;
    url::Url::parse(&base_url)
        .map_err(|e| ApiError::BadRequest(format!("baseUrl is not a valid URL: {e}")))?;

    Ok(InstallRegistration {
        client_key: payload.client_key,
        shared_secret: SecretString::from(shared_secret),
        base_url,
        display_url: payload.display_url,
    })
}

/// Handler for POST /lifecycleEvents/installed
///
/// Creates the tenant, or overwrites its secret and URLs on reinstall.
/// Returns 204 on success.
#[instrument(skip_all, name = "connect.lifecycle.installed")]
pub async fn installed(
    State(state): State<Arc<AppState>>,
    Extension(installation): Extension<VerifiedInstallation>,
    Json(payload): Json<LifecyclePayload>,
) -> Result<StatusCode, ApiError> {
    ensure_same_tenant(&installation, &payload)?;
    ensure_event(&payload, "installed")?;
    let registration = into_registration(payload)?;

    let tenant = state
        .registry
        .upsert(registration)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to store tenant: {e}")))?;

    tracing::info!(
        target: "connect.lifecycle",
        client_key = %tenant.client_key,
        tenant_id = %tenant.id,
        base_url = %tenant.base_url,
        "Tenant installed"
    );

    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /lifecycleEvents/uninstalled
///
/// Removes the tenant. Uninstalling an unknown tenant is not an error.
#[instrument(skip_all, name = "connect.lifecycle.uninstalled")]
pub async fn uninstalled(
    State(state): State<Arc<AppState>>,
    Extension(installation): Extension<VerifiedInstallation>,
    Json(payload): Json<LifecyclePayload>,
) -> Result<StatusCode, ApiError> {
    ensure_same_tenant(&installation, &payload)?;
    ensure_event(&payload, "uninstalled")?;

    let existed = state
        .registry
        .remove(&installation.client_key)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to remove tenant: {e}")))?;

    tracing::info!(
        target: "connect.lifecycle",
        client_key = %installation.client_key,
        existed,
        "Tenant uninstalled"
    );

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> LifecyclePayload {
        serde_json::from_value(value).unwrap()
    }

    fn installation() -> VerifiedInstallation {
        VerifiedInstallation {
            client_key: "jira:abc".to_string(),
        }
    }

    #[test]
    fn test_payload_deserializes_camel_case_and_ignores_extras() {
        let parsed = payload(json!({
            "key": "my-app",
            "eventType": "installed",
            "clientKey": "jira:abc",
            "sharedSecret": "s3cr3t",
            "baseUrl": "https://example.atlassian.net",
            "productType": "jira"
        }));
        assert_eq!(parsed.client_key, "jira:abc");
        assert_eq!(parsed.event_type.as_deref(), Some("installed"));
        assert!(parsed.display_url.is_none());
    }

    #[test]
    fn test_payload_debug_redacts_secret() {
        let parsed = payload(json!({"clientKey": "jira:abc", "sharedSecret": "s3cr3t"}));
        assert!(!format!("{:?}", parsed).contains("s3cr3t"));
    }

    #[test]
    fn test_client_key_must_match_issuer() {
        let other = payload(json!({"clientKey": "jira:other"}));
        assert!(matches!(
            ensure_same_tenant(&installation(), &other),
            Err(ApiError::Forbidden(_))
        ));

        let same = payload(json!({"clientKey": "jira:abc"}));
        assert!(ensure_same_tenant(&installation(), &same).is_ok());
    }

    #[test]
    fn test_event_type_checked_when_present() {
        assert!(ensure_event(&payload(json!({"clientKey": "k"})), "installed").is_ok());
        assert!(matches!(
            ensure_event(
                &payload(json!({"clientKey": "k", "eventType": "uninstalled"})),
                "installed"
            ),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn test_registration_requires_secret_and_base_url() {
        let missing_secret = payload(json!({
            "clientKey": "jira:abc",
            "baseUrl": "https://example.atlassian.net"
        }));
        assert!(matches!(
            into_registration(missing_secret),
            Err(ApiError::BadRequest(_))
        ));

        let bad_url = payload(json!({
            "clientKey": "jira:abc",
            "sharedSecret": "s",
            "baseUrl": "not a url"
        }));
        assert!(matches!(
            into_registration(bad_url),
            Err(ApiError::BadRequest(_))
        ));

        let ok = payload(json!({
            "clientKey": "jira:abc",
            "sharedSecret": "s",
            "baseUrl": "https://example.atlassian.net",
            "displayUrl": "https://jira.example.com"
        }));
        let registration = into_registration(ok).unwrap();
        assert_eq!(registration.display_url.as_deref(), Some("https://jira.example.com"));
    }
}
