//! Builder for Connect test tokens
//!
//! Defaults describe a valid context token from the test tenant: HS256-ready
//! claims with `qsh = "context-qsh"`, issued now, expiring in three minutes.

use crate::crypto_fixtures::TestSigningKey;
use crate::test_ids::{TEST_ACCOUNT_ID, TEST_CLIENT_KEY};
use chrono::{Duration, Utc};
use connect_auth::auth::{RequestCanonicalizer, RequestDescriptor, CONTEXT_QSH};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Map, Value};

/// Fluent builder for Connect JWTs.
///
/// # Example
/// ```rust,ignore
/// let token = ConnectTokenBuilder::new()
///     .bound_to("GET", "/teams", &[("teamId", "42")])
///     .sign_hs256(TEST_SHARED_SECRET);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectTokenBuilder {
    iss: String,
    sub: Option<String>,
    aud: Option<Value>,
    qsh: String,
    iat: i64,
    exp: i64,
    extra: Map<String, Value>,
}

impl ConnectTokenBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            iss: TEST_CLIENT_KEY.to_string(),
            sub: Some(TEST_ACCOUNT_ID.to_string()),
            aud: None,
            qsh: CONTEXT_QSH.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(180)).timestamp(),
            extra: Map::new(),
        }
    }

    pub fn issuer(mut self, iss: &str) -> Self {
        self.iss = iss.to_string();
        self
    }

    pub fn for_user(mut self, account_id: &str) -> Self {
        self.sub = Some(account_id.to_string());
        self
    }

    /// Omit `sub` (server-to-server call).
    pub fn without_user(mut self) -> Self {
        self.sub = None;
        self
    }

    /// Set `aud` to a single string.
    pub fn audience(mut self, aud: &str) -> Self {
        self.aud = Some(json!(aud));
        self
    }

    /// Set `aud` to an array.
    pub fn audiences(mut self, aud: &[&str]) -> Self {
        self.aud = Some(json!(aud));
        self
    }

    pub fn qsh(mut self, qsh: &str) -> Self {
        self.qsh = qsh.to_string();
        self
    }

    pub fn context_qsh(self) -> Self {
        self.qsh(CONTEXT_QSH)
    }

    /// Bind the token to a request with no base-path stripping.
    pub fn bound_to(self, method: &str, path: &str, query: &[(&str, &str)]) -> Self {
        let request = RequestDescriptor::new(
            method,
            path,
            query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self.bound_with(&RequestCanonicalizer::default(), &request)
    }

    /// Bind the token to `request` as seen by `canonicalizer`.
    pub fn bound_with(self, canonicalizer: &RequestCanonicalizer, request: &RequestDescriptor) -> Self {
        let qsh = canonicalizer.compute(request);
        self.qsh(&qsh)
    }

    /// Set expiration in seconds from now (negative for the past).
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    pub fn expires_at(mut self, timestamp: i64) -> Self {
        self.exp = timestamp;
        self
    }

    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = timestamp;
        self
    }

    /// Add or override an arbitrary claim.
    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.extra.insert(name.to_string(), value);
        self
    }

    /// Build the claims as a JSON value
    pub fn build_claims(&self) -> Value {
        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(self.iss));
        claims.insert("iat".to_string(), json!(self.iat));
        claims.insert("exp".to_string(), json!(self.exp));
        claims.insert("qsh".to_string(), json!(self.qsh));
        if let Some(sub) = &self.sub {
            claims.insert("sub".to_string(), json!(sub));
        }
        if let Some(aud) = &self.aud {
            claims.insert("aud".to_string(), aud.clone());
        }
        for (name, value) in &self.extra {
            claims.insert(name.clone(), value.clone());
        }
        Value::Object(claims)
    }

    /// Sign with a tenant shared secret (HS256).
    pub fn sign_hs256(&self, secret: &str) -> String {
        self.sign_with(
            Header::new(Algorithm::HS256),
            &EncodingKey::from_secret(secret.as_bytes()),
        )
    }

    /// Sign with an install key (RS256), putting its `kid` in the header.
    pub fn sign_rs256(&self, key: &TestSigningKey) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.kid.clone());
        self.sign_with(header, &key.encoding)
    }

    /// Sign with an arbitrary header and key.
    pub fn sign_with(&self, header: Header, key: &EncodingKey) -> String {
        encode(&header, &self.build_claims(), key).expect("token encoding")
    }
}

impl Default for ConnectTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
