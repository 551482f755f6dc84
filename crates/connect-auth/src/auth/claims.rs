//! Connect JWT claims.
//!
//! Claims are read out of a raw JSON payload with explicit shape checks rather
//! than a plain serde derive, so that every violation maps to one
//! `ClaimShape` error with a precise reason. The `sub` field is redacted in
//! Debug output to keep Atlassian account ids out of logs.

use crate::errors::AuthenticationError;
use serde_json::{Map, Value};
use std::fmt;

/// Claims carried by every Connect token this service accepts.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectClaims {
    /// Issuer: the tenant's `clientKey` for symmetric tokens.
    pub iss: String,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Query string hash binding the token to a request (or the context sentinel).
    pub qsh: String,

    /// Acting Atlassian account id, absent for server-to-server calls.
    pub sub: Option<String>,

    /// Audience, normalized to a list. Empty when the claim is absent.
    pub aud: Vec<String>,
}

impl fmt::Debug for ConnectClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectClaims")
            .field("iss", &self.iss)
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .field("qsh", &self.qsh)
            .field("sub", &self.sub.as_ref().map(|_| "[REDACTED]"))
            .field("aud", &self.aud)
            .finish()
    }
}

impl ConnectClaims {
    /// Validate the shape of a decoded payload and extract the claims.
    ///
    /// # Errors
    ///
    /// Returns `ClaimShape` when the payload is not an object, `iss`/`qsh`
    /// are not non-empty strings, `iat`/`exp` are not integers, `sub` is
    /// present but not a non-empty string, or `aud` is neither a string nor
    /// an array of strings.
    pub fn from_payload(payload: &Value) -> Result<Self, AuthenticationError> {
        let object = payload.as_object().ok_or_else(|| {
            AuthenticationError::ClaimShape("payload is not a JSON object".to_string())
        })?;

        Ok(Self {
            iss: required_string(object, "iss")?,
            iat: required_integer(object, "iat")?,
            exp: required_integer(object, "exp")?,
            qsh: required_string(object, "qsh")?,
            sub: optional_string(object, "sub")?,
            aud: audience(object)?,
        })
    }

    /// Whether `aud` lists `expected`, ignoring a trailing slash on either side.
    pub fn has_audience(&self, expected: &str) -> bool {
        let expected = expected.trim_end_matches('/');
        self.aud
            .iter()
            .any(|value| value.trim_end_matches('/') == expected)
    }
}

fn required_string(object: &Map<String, Value>, name: &str) -> Result<String, AuthenticationError> {
    match object.get(name) {
        Some(Value::String(value)) if !value.is_empty() => Ok(value.clone()),
        Some(Value::String(_)) => Err(AuthenticationError::ClaimShape(format!(
            "{name} must not be empty"
        ))),
        Some(_) => Err(AuthenticationError::ClaimShape(format!(
            "{name} must be a string"
        ))),
        None => Err(AuthenticationError::ClaimShape(format!("{name} is missing"))),
    }
}

fn required_integer(object: &Map<String, Value>, name: &str) -> Result<i64, AuthenticationError> {
    object
        .get(name)
        .ok_or_else(|| AuthenticationError::ClaimShape(format!("{name} is missing")))?
        .as_i64()
        .ok_or_else(|| AuthenticationError::ClaimShape(format!("{name} must be an integer")))
}

fn optional_string(
    object: &Map<String, Value>,
    name: &str,
) -> Result<Option<String>, AuthenticationError> {
    match object.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => required_string(object, name).map(Some),
    }
}

fn audience(object: &Map<String, Value>) -> Result<Vec<String>, AuthenticationError> {
    match object.get("aud") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(value)) => Ok(vec![value.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(ToString::to_string).ok_or_else(|| {
                    AuthenticationError::ClaimShape("aud entries must be strings".to_string())
                })
            })
            .collect(),
        Some(_) => Err(AuthenticationError::ClaimShape(
            "aud must be a string or an array of strings".to_string(),
        )),
    }
}
