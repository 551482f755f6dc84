//! Connect token verification pipeline.
//!
//! One verifier serves all three token classes. The [`VerificationPolicy`]
//! picks the key source and the QSH rule; everything else is shared:
//!
//! 1. Decode without verifying; reject any algorithm other than the one the
//!    policy allows (algorithm-confusion defense).
//! 2. Resolve the key: the tenant's shared secret (lookup by `iss`) or an
//!    Atlassian install key (fetch by `kid`).
//! 3. Verify the signature with the policy's algorithm and re-read the claims
//!    from the trusted payload.
//! 4. Lifecycle tokens only: require `aud` to contain the app base URL.
//! 5. Check `qsh`, then `exp` with leeway.
//!
//! Both suspension points run under timeouts. Failures are returned as
//! [`AuthenticationError`] and never carry secrets.

use crate::auth::claims::ConnectClaims;
use crate::auth::codec;
use crate::auth::keys::PublicKeyResolver;
use crate::auth::policy::{KeyPolicy, QshPolicy, VerificationPolicy};
use crate::auth::qsh::{RequestCanonicalizer, RequestDescriptor, CONTEXT_QSH};
use crate::config::{
    Config, DEFAULT_JWT_LEEWAY_SECONDS, DEFAULT_PUBLIC_KEY_FETCH_TIMEOUT_MS,
    DEFAULT_PUBLIC_KEY_RETRY_BACKOFF_MS, DEFAULT_TENANT_LOOKUP_TIMEOUT_MS,
};
use crate::errors::AuthenticationError;
use crate::observability::metrics;
use crate::tenants::{Tenant, TenantStore, TenantStoreError};
use jsonwebtoken::DecodingKey;
use secrecy::ExposeSecret;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Values the verifier needs from configuration.
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    /// Expected `aud` of lifecycle tokens; its path is the QSH base path.
    pub app_base_url: String,

    /// Leeway applied to `exp`.
    pub leeway: Duration,

    pub tenant_lookup_timeout: Duration,

    /// Overall bound on resolving an install key, retries included.
    pub key_resolve_timeout: Duration,
}

impl VerifierSettings {
    /// Settings with default leeway and timeouts.
    pub fn new(app_base_url: impl Into<String>) -> Self {
        Self {
            app_base_url: app_base_url.into(),
            leeway: Duration::from_secs(DEFAULT_JWT_LEEWAY_SECONDS),
            tenant_lookup_timeout: Duration::from_millis(DEFAULT_TENANT_LOOKUP_TIMEOUT_MS),
            key_resolve_timeout: key_resolve_timeout(
                Duration::from_millis(DEFAULT_PUBLIC_KEY_FETCH_TIMEOUT_MS),
                Duration::from_millis(DEFAULT_PUBLIC_KEY_RETRY_BACKOFF_MS),
            ),
        }
    }
}

impl From<&Config> for VerifierSettings {
    fn from(config: &Config) -> Self {
        Self {
            app_base_url: config.app_base_url.clone(),
            leeway: config.jwt_leeway(),
            tenant_lookup_timeout: config.tenant_lookup_timeout(),
            key_resolve_timeout: key_resolve_timeout(
                config.public_key_fetch_timeout(),
                config.public_key_retry_backoff(),
            ),
        }
    }
}

/// Two attempts plus the backoff between them.
fn key_resolve_timeout(fetch_timeout: Duration, retry_backoff: Duration) -> Duration {
    fetch_timeout * 2 + retry_backoff
}

/// Result of a successful [`ConnectVerifier::verify`].
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub claims: ConnectClaims,

    /// The issuing tenant; `None` for Atlassian-signed lifecycle tokens.
    pub tenant: Option<Tenant>,
}

/// Identity attached to a request authenticated with a tenant-signed token.
///
/// Built fresh per request and never persisted.
#[derive(Clone)]
pub struct VerifiedIdentity {
    pub tenant: Tenant,

    /// Atlassian account id of the acting user, when the token has a `sub`.
    pub acting_user_id: Option<String>,
}

impl fmt::Debug for VerifiedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedIdentity")
            .field("tenant", &self.tenant.client_key)
            .field(
                "acting_user_id",
                &self.acting_user_id.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Verified `iss` of an install or uninstall callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedInstallation {
    pub client_key: String,
}

pub struct ConnectVerifier {
    settings: VerifierSettings,
    canonicalizer: RequestCanonicalizer,
    tenants: Arc<dyn TenantStore>,
    keys: Arc<dyn PublicKeyResolver>,
}

impl ConnectVerifier {
    pub fn new(
        settings: VerifierSettings,
        tenants: Arc<dyn TenantStore>,
        keys: Arc<dyn PublicKeyResolver>,
    ) -> Self {
        let canonicalizer = RequestCanonicalizer::for_base_url(&settings.app_base_url);
        Self {
            settings,
            canonicalizer,
            tenants,
            keys,
        }
    }

    pub fn settings(&self) -> &VerifierSettings {
        &self.settings
    }

    pub fn canonicalizer(&self) -> &RequestCanonicalizer {
        &self.canonicalizer
    }

    /// Verify `token` for `request` under `policy` at the current time.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthenticationError`] of the first check that failed.
    pub async fn verify(
        &self,
        policy: &VerificationPolicy,
        token: &str,
        request: &RequestDescriptor,
    ) -> Result<VerifiedToken, AuthenticationError> {
        self.verify_at(policy, token, request, chrono::Utc::now().timestamp())
            .await
    }

    /// Verify with an explicit "now" (Unix seconds).
    ///
    /// Exposed so expiry boundaries can be tested deterministically.
    #[instrument(skip_all, fields(policy = policy.name()))]
    pub async fn verify_at(
        &self,
        policy: &VerificationPolicy,
        token: &str,
        request: &RequestDescriptor,
        now: i64,
    ) -> Result<VerifiedToken, AuthenticationError> {
        let started = Instant::now();
        let result = self.run_pipeline(policy, token, request, now).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::record_verification(policy.name(), outcome, started.elapsed());

        match &result {
            Ok(verified) => tracing::debug!(
                target: "connect.auth.verifier",
                policy = policy.name(),
                iss = %verified.claims.iss,
                "Token verified"
            ),
            Err(e) => tracing::debug!(
                target: "connect.auth.verifier",
                policy = policy.name(),
                kind = e.kind(),
                error = %e,
                "Token rejected"
            ),
        }

        result
    }

    /// Verify a context token (tenant-signed, `qsh = "context-qsh"`).
    pub async fn verify_context_token(
        &self,
        token: &str,
        request: &RequestDescriptor,
    ) -> Result<VerifiedIdentity, AuthenticationError> {
        let verified = self
            .verify(&VerificationPolicy::CONTEXT, token, request)
            .await?;
        into_identity(verified)
    }

    /// Verify a tenant-signed token bound to `request` by its QSH.
    pub async fn verify_request_token(
        &self,
        token: &str,
        request: &RequestDescriptor,
    ) -> Result<VerifiedIdentity, AuthenticationError> {
        let verified = self
            .verify(&VerificationPolicy::REQUEST_BOUND, token, request)
            .await?;
        into_identity(verified)
    }

    /// Verify an Atlassian-signed install/uninstall callback token.
    ///
    /// No tenant lookup is performed.
    pub async fn verify_lifecycle_token(
        &self,
        token: &str,
        request: &RequestDescriptor,
    ) -> Result<VerifiedInstallation, AuthenticationError> {
        let verified = self
            .verify(&VerificationPolicy::LIFECYCLE, token, request)
            .await?;
        Ok(VerifiedInstallation {
            client_key: verified.claims.iss,
        })
    }

    async fn run_pipeline(
        &self,
        policy: &VerificationPolicy,
        token: &str,
        request: &RequestDescriptor,
        now: i64,
    ) -> Result<VerifiedToken, AuthenticationError> {
        let unverified = codec::decode_unverified(token)?;

        let algorithm = policy.key().algorithm();
        let expected_alg = codec::algorithm_name(algorithm);
        if unverified.header.alg != expected_alg {
            return Err(AuthenticationError::UnsupportedAlgorithm(format!(
                "{} tokens must use {}, got {}",
                policy.name(),
                expected_alg,
                unverified.header.alg
            )));
        }

        let (claims, tenant) = match policy.key() {
            KeyPolicy::TenantSharedSecret => {
                let untrusted = ConnectClaims::from_payload(&unverified.claims)?;
                let tenant = self.lookup_tenant(&untrusted.iss).await?;

                let key = DecodingKey::from_secret(tenant.shared_secret.expose_secret().as_bytes());
                let payload = codec::decode_verified(token, &key, algorithm)?;
                (ConnectClaims::from_payload(&payload)?, Some(tenant))
            }
            KeyPolicy::AtlassianPublicKey => {
                let kid = unverified
                    .header
                    .kid
                    .as_deref()
                    .filter(|kid| !kid.is_empty())
                    .ok_or_else(|| {
                        AuthenticationError::MalformedToken("kid header is required".to_string())
                    })?;

                let key = self.resolve_public_key(kid).await?;
                let payload = codec::decode_verified(token, &key, algorithm)?;
                let claims = ConnectClaims::from_payload(&payload)?;

                if !claims.has_audience(&self.settings.app_base_url) {
                    return Err(AuthenticationError::AudienceMismatch(format!(
                        "aud {:?} does not contain {}",
                        claims.aud, self.settings.app_base_url
                    )));
                }
                (claims, None)
            }
        };

        self.check_qsh(policy.qsh(), &claims, request)?;
        check_expiry_at(claims.exp, self.leeway_seconds(), now)?;

        Ok(VerifiedToken { claims, tenant })
    }

    async fn lookup_tenant(&self, client_key: &str) -> Result<Tenant, AuthenticationError> {
        let lookup = self.tenants.get_by_client_key(client_key);
        match tokio::time::timeout(self.settings.tenant_lookup_timeout, lookup).await {
            Ok(Ok(tenant)) => Ok(tenant),
            Ok(Err(TenantStoreError::NotFound(_))) => Err(AuthenticationError::UnknownTenant(
                format!("no tenant installed for {client_key}"),
            )),
            Ok(Err(e)) => {
                tracing::warn!(target: "connect.auth.verifier", error = %e, "Tenant lookup failed");
                Err(AuthenticationError::UnknownTenant(format!(
                    "tenant lookup failed: {e}"
                )))
            }
            Err(_) => {
                tracing::warn!(
                    target: "connect.auth.verifier",
                    timeout_ms = self.settings.tenant_lookup_timeout.as_millis() as u64,
                    "Tenant lookup timed out"
                );
                Err(AuthenticationError::UnknownTenant(
                    "tenant lookup timed out".to_string(),
                ))
            }
        }
    }

    async fn resolve_public_key(&self, kid: &str) -> Result<DecodingKey, AuthenticationError> {
        let fetch = self.keys.fetch(kid);
        let pem = match tokio::time::timeout(self.settings.key_resolve_timeout, fetch).await {
            Ok(Ok(pem)) => pem,
            Ok(Err(e)) => {
                return Err(AuthenticationError::PublicKeyUnavailable(format!(
                    "kid {kid}: {e}"
                )))
            }
            Err(_) => {
                tracing::warn!(target: "connect.auth.verifier", kid = %kid, "Install key resolution timed out");
                return Err(AuthenticationError::PublicKeyUnavailable(format!(
                    "kid {kid}: resolution timed out"
                )));
            }
        };

        DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
            AuthenticationError::PublicKeyUnavailable(format!("kid {kid}: unusable PEM: {e}"))
        })
    }

    fn check_qsh(
        &self,
        policy: QshPolicy,
        claims: &ConnectClaims,
        request: &RequestDescriptor,
    ) -> Result<(), AuthenticationError> {
        match policy {
            QshPolicy::ContextSentinel => {
                if claims.qsh != CONTEXT_QSH {
                    return Err(AuthenticationError::QshMismatch(format!(
                        "context token must carry {CONTEXT_QSH}"
                    )));
                }
            }
            QshPolicy::RequestBound => {
                // A context token must never authenticate a specific endpoint
                if claims.qsh == CONTEXT_QSH {
                    return Err(AuthenticationError::QshMismatch(
                        "context sentinel is not accepted for request-bound tokens".to_string(),
                    ));
                }

                let expected = self.canonicalizer.compute(request);
                if claims.qsh != expected {
                    return Err(AuthenticationError::QshMismatch(format!(
                        "token is bound to a different request than {} {}",
                        request.method, request.pathname
                    )));
                }
            }
        }
        Ok(())
    }

    fn leeway_seconds(&self) -> i64 {
        i64::try_from(self.settings.leeway.as_secs()).unwrap_or(i64::MAX)
    }
}

fn into_identity(verified: VerifiedToken) -> Result<VerifiedIdentity, AuthenticationError> {
    let tenant = verified.tenant.ok_or_else(|| {
        AuthenticationError::UnknownTenant("token was not issued by a tenant".to_string())
    })?;

    Ok(VerifiedIdentity {
        tenant,
        acting_user_id: verified.claims.sub,
    })
}

/// Require `now <= exp + leeway`.
///
/// # Errors
///
/// Returns `TokenExpired` once the leeway has elapsed.
pub fn check_expiry_at(exp: i64, leeway_seconds: i64, now: i64) -> Result<(), AuthenticationError> {
    if now <= exp.saturating_add(leeway_seconds) {
        return Ok(());
    }

    Err(AuthenticationError::TokenExpired(format!(
        "exp {exp} is more than {leeway_seconds}s before now {now}"
    )))
}
