//! Error types for Connect request authentication.
//!
//! Every authentication failure collapses into one generic 401 at the HTTP
//! boundary. The concrete variant and its reason are logged server-side only,
//! so a caller probing with forged tokens learns nothing about which check
//! rejected them.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Static message returned to clients for every authentication failure.
pub const UNAUTHORIZED_MESSAGE: &str = "Unauthorized";

/// `WWW-Authenticate` challenge attached to 401 responses.
const WWW_AUTHENTICATE_CHALLENGE: &str = "JWT realm=\"atlassian-connect\"";

/// Reasons an inbound Connect JWT was rejected.
///
/// The `String` payload is an internal reason for logs. It is never
/// serialized to the client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid claim shape: {0}")]
    ClaimShape(String),

    #[error("unknown tenant: {0}")]
    UnknownTenant(String),

    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("query string hash mismatch: {0}")]
    QshMismatch(String),

    #[error("token expired: {0}")]
    TokenExpired(String),

    #[error("audience mismatch: {0}")]
    AudienceMismatch(String),

    #[error("public key unavailable: {0}")]
    PublicKeyUnavailable(String),
}

impl AuthenticationError {
    /// Bounded identifier of the variant, used as a log field and metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthenticationError::MalformedToken(_) => "malformed_token",
            AuthenticationError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            AuthenticationError::ClaimShape(_) => "claim_shape",
            AuthenticationError::UnknownTenant(_) => "unknown_tenant",
            AuthenticationError::SignatureVerification(_) => "signature_verification",
            AuthenticationError::QshMismatch(_) => "qsh_mismatch",
            AuthenticationError::TokenExpired(_) => "token_expired",
            AuthenticationError::AudienceMismatch(_) => "audience_mismatch",
            AuthenticationError::PublicKeyUnavailable(_) => "public_key_unavailable",
        }
    }
}

/// Errors raised by route handlers after authentication succeeded.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::Forbidden(_) => 403,
            ApiError::Internal(_) => 500,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

fn error_body(status: StatusCode, code: &str, message: String) -> Response {
    let body = ErrorResponse {
        error: ErrorDetail {
            code: code.to_string(),
            message,
        },
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for AuthenticationError {
    fn into_response(self) -> Response {
        // The reason stays in the logs; the client only ever sees the static message
        tracing::warn!(
            target: "connect.auth",
            kind = self.kind(),
            reason = %self,
            "Request authentication failed"
        );

        let mut response = error_body(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            UNAUTHORIZED_MESSAGE.to_string(),
        );

        if let Ok(header_value) = WWW_AUTHENTICATE_CHALLENGE.parse() {
            response
                .headers_mut()
                .insert("WWW-Authenticate", header_value);
        }

        response
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            ApiError::Forbidden(reason) => {
                tracing::warn!(target: "connect.api", reason = %reason, "Request forbidden");
                (
                    StatusCode::FORBIDDEN,
                    "FORBIDDEN",
                    "The request is not permitted".to_string(),
                )
            }
            ApiError::Internal(reason) => {
                tracing::error!(target: "connect.api", reason = %reason, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        error_body(status, code, message)
    }
}
