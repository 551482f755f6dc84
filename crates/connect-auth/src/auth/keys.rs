//! Atlassian install-key resolution and caching.
//!
//! Lifecycle callbacks are signed with RS256 by Atlassian. The public key is
//! published as a PEM document at `{install_keys_url}/{kid}`.
//!
//! # Security
//!
//! - The `kid` is untrusted input: it is percent-encoded as a single path
//!   segment so it cannot escape the install-key base URL
//! - Failed fetches are never cached, and a PEM that does not parse as an
//!   RSA public key counts as a failed fetch
//! - Keys are cached with a TTL so rotated keys are picked up

use crate::config::Config;
use crate::observability::metrics;
use jsonwebtoken::DecodingKey;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::instrument;

/// Key ids longer than this are rejected without a request.
pub const MAX_KEY_ID_LENGTH: usize = 256;

/// Upper bound on an install-key response body.
pub const MAX_PUBLIC_KEY_BYTES: usize = 16 * 1024;

const PEM_PREFIX: &str = "-----BEGIN";

/// Reject anything that will not load as an RSA verification key.
fn ensure_rsa_public_key(pem: &str) -> Result<(), KeyFetchError> {
    if !pem.trim_start().starts_with(PEM_PREFIX) {
        return Err(KeyFetchError::Invalid("body is not a PEM document".to_string()));
    }
    DecodingKey::from_rsa_pem(pem.as_bytes())
        .map(|_| ())
        .map_err(|e| KeyFetchError::Invalid(format!("unusable RSA public key: {e}")))
}

/// Why an install key could not be obtained.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyFetchError {
    #[error("key id is not acceptable")]
    InvalidKeyId,

    #[error("no install key published for this key id")]
    NotFound,

    /// Connect failure, timeout or 5xx. The only retryable class.
    #[error("transient install-key failure: {0}")]
    Transient(String),

    #[error("invalid install-key response: {0}")]
    Invalid(String),
}

impl KeyFetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, KeyFetchError::Transient(_))
    }
}

/// Fetches an Atlassian public key (PEM) by key id.
#[async_trait::async_trait]
pub trait PublicKeyResolver: Send + Sync {
    async fn fetch(&self, key_id: &str) -> Result<String, KeyFetchError>;
}

/// Resolver backed by the Atlassian install-key HTTP service.
pub struct HttpPublicKeyResolver {
    /// Base URL without a trailing slash.
    base_url: String,

    http_client: reqwest::Client,

    retry_backoff: Duration,
}

impl HttpPublicKeyResolver {
    /// Create a resolver.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Install-key service base URL
    /// * `fetch_timeout` - Timeout for each individual attempt
    /// * `retry_backoff` - Delay before the single retry of a transient failure
    pub fn new(base_url: &str, fetch_timeout: Duration, retry_backoff: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "connect.auth.keys", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            retry_backoff,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.install_keys_url,
            config.public_key_fetch_timeout(),
            config.public_key_retry_backoff(),
        )
    }

    fn key_url(&self, key_id: &str) -> Result<String, KeyFetchError> {
        if key_id.is_empty()
            || key_id == "."
            || key_id == ".."
            || key_id.len() > MAX_KEY_ID_LENGTH
        {
            return Err(KeyFetchError::InvalidKeyId);
        }

        Ok(format!(
            "{}/{}",
            self.base_url,
            urlencoding::encode(key_id)
        ))
    }

    async fn fetch_once(&self, url: &str) -> Result<String, KeyFetchError> {
        let response = self.http_client.get(url).send().await.map_err(|e| {
            if e.is_builder() {
                KeyFetchError::Invalid(format!("request could not be built: {e}"))
            } else {
                KeyFetchError::Transient(e.to_string())
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(KeyFetchError::NotFound);
        }
        if status.is_server_error() {
            return Err(KeyFetchError::Transient(format!("install-key service returned {status}")));
        }
        if !status.is_success() {
            return Err(KeyFetchError::Invalid(format!(
                "install-key service returned {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| KeyFetchError::Transient(format!("failed to read body: {e}")))?;

        if body.len() > MAX_PUBLIC_KEY_BYTES {
            return Err(KeyFetchError::Invalid(format!(
                "body exceeds {MAX_PUBLIC_KEY_BYTES} bytes"
            )));
        }
        ensure_rsa_public_key(&body)?;

        Ok(body)
    }
}

#[async_trait::async_trait]
impl PublicKeyResolver for HttpPublicKeyResolver {
    #[instrument(skip(self), fields(kid = %key_id))]
    async fn fetch(&self, key_id: &str) -> Result<String, KeyFetchError> {
        let url = self.key_url(key_id)?;
        tracing::debug!(target: "connect.auth.keys", url = %url, "Fetching install key");

        let first = match self.fetch_once(&url).await {
            Ok(pem) => {
                metrics::record_public_key_fetch("success");
                return Ok(pem);
            }
            Err(e) => e,
        };

        if !first.is_transient() {
            metrics::record_public_key_fetch(fetch_status(&first));
            tracing::warn!(target: "connect.auth.keys", error = %first, "Install key fetch failed");
            return Err(first);
        }

        metrics::record_public_key_fetch("retry");
        tracing::warn!(
            target: "connect.auth.keys",
            error = %first,
            backoff_ms = self.retry_backoff.as_millis() as u64,
            "Transient install key failure, retrying once"
        );
        tokio::time::sleep(self.retry_backoff).await;

        match self.fetch_once(&url).await {
            Ok(pem) => {
                metrics::record_public_key_fetch("success");
                Ok(pem)
            }
            Err(e) => {
                metrics::record_public_key_fetch(fetch_status(&e));
                tracing::error!(target: "connect.auth.keys", error = %e, "Install key fetch failed after retry");
                Err(e)
            }
        }
    }
}

fn fetch_status(error: &KeyFetchError) -> &'static str {
    match error {
        KeyFetchError::NotFound => "not_found",
        KeyFetchError::InvalidKeyId | KeyFetchError::Invalid(_) => "invalid",
        KeyFetchError::Transient(_) => "error",
    }
}

struct CachedKey {
    pem: String,
    inserted_at: Instant,
    expires_at: Instant,
}

/// Bounded TTL cache in front of another resolver.
///
/// Expired entries are purged on insert. When the cache is full the entry
/// inserted earliest is evicted.
pub struct CachedPublicKeyResolver {
    inner: Arc<dyn PublicKeyResolver>,
    cache: RwLock<HashMap<String, CachedKey>>,
    ttl: Duration,
    capacity: usize,
}

impl CachedPublicKeyResolver {
    pub fn new(inner: Arc<dyn PublicKeyResolver>, ttl: Duration, capacity: usize) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn from_config(inner: Arc<dyn PublicKeyResolver>, config: &Config) -> Self {
        Self::new(
            inner,
            config.public_key_cache_ttl(),
            config.public_key_cache_capacity,
        )
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.cache
            .read()
            .await
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn insert(&self, key_id: &str, pem: String) {
        let mut cache = self.cache.write().await;
        let now = Instant::now();

        cache.retain(|_, entry| entry.expires_at > now);

        if cache.len() >= self.capacity && !cache.contains_key(key_id) {
            let oldest = cache
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(kid, _)| kid.clone());
            if let Some(oldest) = oldest {
                tracing::debug!(target: "connect.auth.keys", evicted = %oldest, "Install key cache full, evicting oldest");
                cache.remove(&oldest);
            }
        }

        cache.insert(
            key_id.to_string(),
            CachedKey {
                pem,
                inserted_at: now,
                expires_at: now + self.ttl,
            },
        );
    }
}

#[async_trait::async_trait]
impl PublicKeyResolver for CachedPublicKeyResolver {
    async fn fetch(&self, key_id: &str) -> Result<String, KeyFetchError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(key_id) {
                if entry.expires_at > Instant::now() {
                    metrics::record_public_key_cache("hit");
                    tracing::debug!(target: "connect.auth.keys", kid = %key_id, "Install key cache hit");
                    return Ok(entry.pem.clone());
                }
            }
        }

        metrics::record_public_key_cache("miss");
        let pem = self.inner.fetch(key_id).await?;
        ensure_rsa_public_key(&pem)?;
        self.insert(key_id, pem.clone()).await;
        Ok(pem)
    }
}

/// Mock resolvers for testing.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory resolver that serves a fixed set of keys.
    pub struct MockPublicKeyResolver {
        keys: HashMap<String, String>,
        /// Returned for every call when set.
        failure: Option<KeyFetchError>,
        /// Delay applied before answering.
        delay: Duration,
        call_count: AtomicUsize,
    }

    impl MockPublicKeyResolver {
        /// Create a mock that serves `keys` (kid -> PEM).
        pub fn with_keys<I, K, V>(keys: I) -> Self
        where
            I: IntoIterator<Item = (K, V)>,
            K: Into<String>,
            V: Into<String>,
        {
            Self {
                keys: keys
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
                failure: None,
                delay: Duration::ZERO,
                call_count: AtomicUsize::new(0),
            }
        }

        /// Create a mock that always fails with `error`.
        pub fn failing(error: KeyFetchError) -> Self {
            Self {
                failure: Some(error),
                ..Self::with_keys(Vec::<(String, String)>::new())
            }
        }

        /// Delay every answer by `delay`.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl PublicKeyResolver for MockPublicKeyResolver {
        async fn fetch(&self, key_id: &str) -> Result<String, KeyFetchError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            if let Some(error) = &self.failure {
                return Err(error.clone());
            }

            self.keys.get(key_id).cloned().ok_or(KeyFetchError::NotFound)
        }
    }
}
