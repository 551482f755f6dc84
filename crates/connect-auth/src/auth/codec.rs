//! JWT structure parsing and signature verification.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - [`decode_unverified`] performs no signature check; its output may only
//!   be used to pick a key and to reject obviously wrong algorithms
//! - [`decode_verified`] verifies with the algorithm chosen by the caller,
//!   never the one advertised in the token header
//! - Signature comparison is constant-time (delegated to `jsonwebtoken`)

use crate::errors::AuthenticationError;
use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use serde_json::Value;

/// Maximum allowed JWT size in bytes (8KB).
///
/// Context tokens carry a small context object and lifecycle tokens only the
/// standard claims, so anything larger is rejected before decoding.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// base64url engine that accepts segments with or without `=` padding.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The JOSE header fields this crate cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// Algorithm as advertised by the token. Untrusted.
    pub alg: String,

    /// Key id, used by the asymmetric flow to pick an Atlassian install key.
    pub kid: Option<String>,
}

/// A token split into its decoded header and payload, signature unchecked.
#[derive(Debug, Clone)]
pub struct UnverifiedToken {
    pub header: TokenHeader,
    pub claims: Value,
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// The three segments of a compact JWS.
struct Segments<'a> {
    header: &'a str,
    payload: &'a str,
    signature: &'a str,
}

fn split_segments(token: &str) -> Result<Segments<'_>, AuthenticationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "connect.auth.codec",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(AuthenticationError::MalformedToken(format!(
            "token exceeds {MAX_JWT_SIZE_BYTES} bytes"
        )));
    }

    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(header), Some(payload), Some(signature), None)
            if !header.is_empty() && !payload.is_empty() =>
        {
            Ok(Segments {
                header,
                payload,
                signature,
            })
        }
        _ => Err(AuthenticationError::MalformedToken(
            "token must have exactly three segments".to_string(),
        )),
    }
}

fn decode_json_segment(segment: &str, name: &str) -> Result<Value, AuthenticationError> {
    let bytes = URL_SAFE_LENIENT.decode(segment).map_err(|e| {
        AuthenticationError::MalformedToken(format!("{name} is not valid base64url: {e}"))
    })?;

    serde_json::from_slice(&bytes)
        .map_err(|e| AuthenticationError::MalformedToken(format!("{name} is not valid JSON: {e}")))
}

/// Decode header and claims without verifying the signature.
///
/// # Errors
///
/// Returns `MalformedToken` when the token is oversized, does not have three
/// segments, or a segment is not base64url-encoded JSON. A header without a
/// string `alg` is also malformed.
pub fn decode_unverified(token: &str) -> Result<UnverifiedToken, AuthenticationError> {
    let segments = split_segments(token)?;

    let header_value = decode_json_segment(segments.header, "header")?;
    let raw: RawHeader = serde_json::from_value(header_value).map_err(|e| {
        AuthenticationError::MalformedToken(format!("header is missing a string alg: {e}"))
    })?;

    let claims = decode_json_segment(segments.payload, "payload")?;

    Ok(UnverifiedToken {
        header: TokenHeader {
            alg: raw.alg,
            kid: raw.kid,
        },
        claims,
    })
}

/// Verify the signature with `algorithm` and return the trusted claims.
///
/// The header's own `alg` is ignored here. Callers must already have checked
/// that the advertised algorithm is the one legal for their flow.
///
/// # Errors
///
/// Returns `SignatureVerification` if the signature does not match (or cannot
/// be decoded), and `MalformedToken` for structural problems.
pub fn decode_verified(
    token: &str,
    key: &DecodingKey,
    algorithm: Algorithm,
) -> Result<Value, AuthenticationError> {
    let segments = split_segments(token)?;

    let signing_input_len = segments.header.len() + 1 + segments.payload.len();
    let signing_input = token.get(..signing_input_len).ok_or_else(|| {
        AuthenticationError::MalformedToken("signing input out of range".to_string())
    })?;

    let valid = jsonwebtoken::crypto::verify(
        segments.signature,
        signing_input.as_bytes(),
        key,
        algorithm,
    )
    .map_err(|e| {
        tracing::debug!(target: "connect.auth.codec", error = %e, "Signature check errored");
        AuthenticationError::SignatureVerification(format!(
            "{} signature could not be checked: {e}",
            algorithm_name(algorithm)
        ))
    })?;

    if !valid {
        return Err(AuthenticationError::SignatureVerification(format!(
            "{} signature does not match",
            algorithm_name(algorithm)
        )));
    }

    decode_json_segment(segments.payload, "payload")
}

/// Registered JOSE name of an algorithm, as it appears in token headers.
pub fn algorithm_name(algorithm: Algorithm) -> &'static str {
    match algorithm {
        Algorithm::HS256 => "HS256",
        Algorithm::HS384 => "HS384",
        Algorithm::HS512 => "HS512",
        Algorithm::ES256 => "ES256",
        Algorithm::ES384 => "ES384",
        Algorithm::RS256 => "RS256",
        Algorithm::RS384 => "RS384",
        Algorithm::RS512 => "RS512",
        Algorithm::PS256 => "PS256",
        Algorithm::PS384 => "PS384",
        Algorithm::PS512 => "PS512",
        Algorithm::EdDSA => "EdDSA",
    }
}
