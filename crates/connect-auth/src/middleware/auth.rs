//! Connect JWT middleware for protected routes.
//!
//! Extracts the token from the `Authorization: JWT <token>` header or the
//! `jwt` query parameter (the header wins when both are present), verifies it
//! under the route's policy, and stores the verified identity in request
//! extensions for handlers.
//!
//! Every failure short-circuits with the generic 401 produced by
//! [`AuthenticationError`]'s `IntoResponse`.

use crate::auth::{ConnectVerifier, RequestDescriptor};
use crate::auth::qsh::TOKEN_QUERY_PARAMETER;
use crate::errors::AuthenticationError;
use axum::{
    extract::{OriginalUri, Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// Authorization scheme used by Atlassian Connect.
const JWT_SCHEME: &str = "JWT";

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub verifier: Arc<ConnectVerifier>,
}

/// Pull the raw token from a request.
///
/// # Errors
///
/// Returns `MalformedToken` when neither carrier holds a token.
pub fn extract_token(
    headers: &HeaderMap,
    request: &RequestDescriptor,
) -> Result<String, AuthenticationError> {
    if let Some(token) = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(token_from_authorization)
    {
        return Ok(token.to_string());
    }

    request
        .query_value(TOKEN_QUERY_PARAMETER)
        .filter(|token| !token.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| {
            tracing::debug!(target: "connect.middleware.auth", "No token in Authorization header or query");
            AuthenticationError::MalformedToken("no token presented".to_string())
        })
}

/// Describe the request as the product signed it.
///
/// Inside a nested router `req.uri()` has the nest prefix removed, so the
/// full URI is taken from [`OriginalUri`] when axum recorded one.
pub fn request_descriptor(req: &Request) -> RequestDescriptor {
    let uri = req
        .extensions()
        .get::<OriginalUri>()
        .map_or(req.uri(), |original| &original.0);
    RequestDescriptor::from_http(req.method(), uri)
}

fn token_from_authorization(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case(JWT_SCHEME) && !token.is_empty()).then_some(token)
}

/// Require a tenant-signed context token (`qsh = "context-qsh"`).
///
/// Inserts a [`VerifiedIdentity`](crate::auth::VerifiedIdentity).
#[instrument(skip_all, name = "connect.middleware.context")]
pub async fn require_context_token(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, AuthenticationError> {
    let descriptor = request_descriptor(&req);
    let token = extract_token(req.headers(), &descriptor)?;

    let identity = state
        .verifier
        .verify_context_token(&token, &descriptor)
        .await?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Require a tenant-signed token bound to this exact request.
///
/// Inserts a [`VerifiedIdentity`](crate::auth::VerifiedIdentity).
#[instrument(skip_all, name = "connect.middleware.request")]
pub async fn require_request_token(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, AuthenticationError> {
    let descriptor = request_descriptor(&req);
    let token = extract_token(req.headers(), &descriptor)?;

    let identity = state
        .verifier
        .verify_request_token(&token, &descriptor)
        .await?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

/// Require an Atlassian-signed lifecycle token.
///
/// Inserts a [`VerifiedInstallation`](crate::auth::VerifiedInstallation).
#[instrument(skip_all, name = "connect.middleware.lifecycle")]
pub async fn require_lifecycle_token(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, AuthenticationError> {
    let descriptor = request_descriptor(&req);
    let token = extract_token(req.headers(), &descriptor)?;

    let installation = state
        .verifier
        .verify_lifecycle_token(&token, &descriptor)
        .await?;

    req.extensions_mut().insert(installation);
    Ok(next.run(req).await)
}
