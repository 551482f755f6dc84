//! Mock Atlassian install-key service
//!
//! Wraps a wiremock server that answers `GET /{kid}` with a PEM document.
//! Expectations set through `.expect(..)` are verified when the server drops.

use crate::crypto_fixtures::TestSigningKey;
use connect_auth::auth::HttpPublicKeyResolver;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Per-attempt timeout used by [`TestKeyServer::resolver`].
pub const TEST_FETCH_TIMEOUT: Duration = Duration::from_millis(500);

/// Retry backoff used by [`TestKeyServer::resolver`].
pub const TEST_RETRY_BACKOFF: Duration = Duration::from_millis(10);

pub struct TestKeyServer {
    server: MockServer,
}

impl TestKeyServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// HTTP resolver pointed at this server with short test timeouts.
    pub fn resolver(&self) -> HttpPublicKeyResolver {
        HttpPublicKeyResolver::new(&self.url(), TEST_FETCH_TIMEOUT, TEST_RETRY_BACKOFF)
    }

    /// Serve `key` for any number of requests.
    pub async fn serve_key(&self, key: &TestSigningKey) {
        Mock::given(method("GET"))
            .and(path(format!("/{}", key.kid)))
            .respond_with(ResponseTemplate::new(200).set_body_string(key.public_pem.clone()))
            .mount(&self.server)
            .await;
    }

    /// Serve `key` and require exactly `calls` requests for it.
    pub async fn serve_key_expecting(&self, key: &TestSigningKey, calls: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/{}", key.kid)))
            .respond_with(ResponseTemplate::new(200).set_body_string(key.public_pem.clone()))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Answer the first request for `key` with `status`, then serve the key.
    pub async fn fail_once_then_serve(&self, key: &TestSigningKey, status: u16) {
        Mock::given(method("GET"))
            .and(path(format!("/{}", key.kid)))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(1)
            .with_priority(1)
            .expect(1)
            .mount(&self.server)
            .await;
        self.serve_key_expecting(key, 1).await;
    }

    /// Answer every request for `kid` with `status`, requiring exactly `calls`.
    pub async fn respond_with_status(&self, kid: &str, status: u16, calls: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/{kid}")))
            .respond_with(ResponseTemplate::new(status))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Answer requests for `kid` with an arbitrary body.
    pub async fn respond_with_body(&self, kid: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/{kid}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .mount(&self.server)
            .await;
    }

    /// Answer the first request for `key` with `body`, then serve the key.
    pub async fn respond_with_body_once_then_serve(&self, key: &TestSigningKey, body: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/{}", key.kid)))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .up_to_n_times(1)
            .with_priority(1)
            .expect(1)
            .mount(&self.server)
            .await;
        self.serve_key_expecting(key, 1).await;
    }

    /// Serve `key` after `delay`.
    pub async fn serve_key_slowly(&self, key: &TestSigningKey, delay: Duration) {
        Mock::given(method("GET"))
            .and(path(format!("/{}", key.kid)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(key.public_pem.clone())
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    /// Number of requests the server has received so far.
    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }
}
