//! HTTP-level tests for the Connect JWT middleware and lifecycle callbacks.
//!
//! Requests are driven through the real router with `tower::ServiceExt::oneshot`.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware,
    response::Response,
    routing::get,
    Extension, Router,
};
use connect_auth::auth::{ConnectVerifier, VerifiedIdentity};
use connect_auth::errors::UNAUTHORIZED_MESSAGE;
use connect_auth::middleware::{require_context_token, require_request_token, AuthState};
use connect_auth::observability::metrics::init_metrics_recorder;
use connect_auth::routes::{self, AppState};
use connect_auth::tenants::{InMemoryTenantStore, TenantStore};
use connect_auth_test_utils::*;
use http_body_util::BodyExt;
use metrics_exporter_prometheus::PrometheusHandle;
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use tower::ServiceExt;

/// Global metrics handle for test routers
static TEST_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_test_metrics_handle() -> PrometheusHandle {
    TEST_METRICS_HANDLE
        .get_or_init(|| {
            init_metrics_recorder().unwrap_or_else(|_| {
                metrics_exporter_prometheus::PrometheusBuilder::new()
                    .build_recorder()
                    .handle()
            })
        })
        .clone()
}

/// A service under test: the production router plus routes that echo the
/// verified identity, all sharing one tenant store.
struct TestApp {
    router: Router,
    store: Arc<InMemoryTenantStore>,
}

impl TestApp {
    fn new(store: Arc<InMemoryTenantStore>) -> Self {
        let verifier = Arc::new(ConnectVerifier::new(
            test_settings(),
            store.clone(),
            mock_resolver(&[install_signing_key()]),
        ));

        let state = Arc::new(AppState {
            verifier: verifier.clone(),
            registry: store.clone(),
        });
        let auth_state = Arc::new(AuthState { verifier });

        let context_routes = Router::new()
            .route("/panel", get(whoami))
            .route_layer(middleware::from_fn_with_state(
                auth_state.clone(),
                require_context_token,
            ));
        let request_routes = Router::new()
            .route("/teams", get(whoami).delete(whoami))
            .route_layer(middleware::from_fn_with_state(
                auth_state,
                require_request_token,
            ));

        let router = routes::build_routes(state, get_test_metrics_handle())
            .merge(context_routes)
            .merge(request_routes);

        Self { router, store }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

async fn whoami(Extension(identity): Extension<VerifiedIdentity>) -> axum::Json<Value> {
    axum::Json(json!({
        "client_key": identity.tenant.client_key,
        "acting_user_id": identity.acting_user_id,
    }))
}

async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get_with_jwt(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("JWT {token}"))
        .body(Body::empty())
        .unwrap()
}

fn lifecycle_request(event: &str, token: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/lifecycleEvents/{event}"))
        .header(header::AUTHORIZATION, format!("JWT {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

fn lifecycle_token(event: &str) -> String {
    ConnectTokenBuilder::new()
        .without_user()
        .audiences(&[TEST_APP_BASE_URL])
        .bound_to("POST", &format!("/lifecycleEvents/{event}"), &[])
        .sign_rs256(install_signing_key())
}

fn install_payload(client_key: &str, secret: &str) -> Value {
    json!({
        "key": "connect-auth-test-app",
        "eventType": "installed",
        "clientKey": client_key,
        "sharedSecret": secret,
        "baseUrl": TEST_PRODUCT_BASE_URL,
        "productType": "jira"
    })
}

// ============================================================================
// Lifecycle callbacks
// ============================================================================

#[tokio::test]
async fn test_install_registers_tenant_and_secret_becomes_usable() -> Result<()> {
    let app = TestApp::new(Arc::new(InMemoryTenantStore::new()));
    let secret = "freshly-installed-shared-secret";

    let response = app
        .send(lifecycle_request(
            "installed",
            &lifecycle_token("installed"),
            install_payload(TEST_CLIENT_KEY, secret),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let tenant = app.store.get_by_client_key(TEST_CLIENT_KEY).await?;
    assert_eq!(tenant.shared_secret.expose_secret(), secret);
    assert_eq!(tenant.base_url, TEST_PRODUCT_BASE_URL);

    let token = ConnectTokenBuilder::new().sign_hs256(secret);
    let response = app.send(get_with_jwt("/panel", &token)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["client_key"], TEST_CLIENT_KEY);
    assert_eq!(body["acting_user_id"], TEST_ACCOUNT_ID);
    Ok(())
}

#[tokio::test]
async fn test_reinstall_rotates_shared_secret() -> Result<()> {
    let app = TestApp::new(tenant_store());

    let response = app
        .send(lifecycle_request(
            "installed",
            &lifecycle_token("installed"),
            install_payload(TEST_CLIENT_KEY, "rotated-secret"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let old = ConnectTokenBuilder::new().sign_hs256(TEST_SHARED_SECRET);
    let response = app.send(get_with_jwt("/panel", &old)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let new = ConnectTokenBuilder::new().sign_hs256("rotated-secret");
    let response = app.send(get_with_jwt("/panel", &new)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let tenant = app.store.get_by_client_key(TEST_CLIENT_KEY).await?;
    assert_eq!(tenant.id, TEST_TENANT_ID);
    Ok(())
}

#[tokio::test]
async fn test_uninstall_removes_tenant() -> Result<()> {
    let app = TestApp::new(tenant_store());

    let response = app
        .send(lifecycle_request(
            "uninstalled",
            &lifecycle_token("uninstalled"),
            json!({"eventType": "uninstalled", "clientKey": TEST_CLIENT_KEY}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.store.len().await, 1);

    let token = ConnectTokenBuilder::new().sign_hs256(TEST_SHARED_SECRET);
    let response = app.send(get_with_jwt("/panel", &token)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn test_install_for_another_client_key_forbidden() -> Result<()> {
    let app = TestApp::new(Arc::new(InMemoryTenantStore::new()));

    let response = app
        .send(lifecycle_request(
            "installed",
            &lifecycle_token("installed"),
            install_payload(TEST_OTHER_CLIENT_KEY, "hijack"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(app.store.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_install_without_shared_secret_rejected() -> Result<()> {
    let app = TestApp::new(Arc::new(InMemoryTenantStore::new()));

    let response = app
        .send(lifecycle_request(
            "installed",
            &lifecycle_token("installed"),
            json!({"clientKey": TEST_CLIENT_KEY, "baseUrl": TEST_PRODUCT_BASE_URL}),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(app.store.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn test_install_signed_with_tenant_secret_rejected() -> Result<()> {
    let app = TestApp::new(tenant_store());

    // A tenant cannot install itself with its own shared secret
    let token = ConnectTokenBuilder::new()
        .audiences(&[TEST_APP_BASE_URL])
        .bound_to("POST", "/lifecycleEvents/installed", &[])
        .sign_hs256(TEST_SHARED_SECRET);

    let response = app
        .send(lifecycle_request(
            "installed",
            &token,
            install_payload(TEST_CLIENT_KEY, "attacker-secret"),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let tenant = app.store.get_by_client_key(TEST_CLIENT_KEY).await?;
    assert_eq!(tenant.shared_secret.expose_secret(), TEST_SHARED_SECRET);
    Ok(())
}

// ============================================================================
// Middleware
// ============================================================================

#[tokio::test]
async fn test_rejection_is_generic_401_with_challenge() -> Result<()> {
    let app = TestApp::new(tenant_store());
    let expired = ConnectTokenBuilder::new()
        .expires_in(-3600)
        .sign_hs256(TEST_SHARED_SECRET);

    let response = app.send(get_with_jwt("/panel", &expired)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
        "JWT realm=\"atlassian-connect\""
    );

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    assert_eq!(body["error"]["message"], UNAUTHORIZED_MESSAGE);
    assert!(!body.to_string().contains("exp"));
    Ok(())
}

#[tokio::test]
async fn test_missing_token_rejected() -> Result<()> {
    let app = TestApp::new(tenant_store());

    let response = app
        .send(Request::builder().uri("/panel").body(Body::empty())?)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let bearer = Request::builder()
        .uri("/panel")
        .header(header::AUTHORIZATION, "Bearer abc.def.ghi")
        .body(Body::empty())?;
    let response = app.send(bearer).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn test_token_accepted_from_query_parameter() -> Result<()> {
    let app = TestApp::new(tenant_store());
    let token = ConnectTokenBuilder::new().sign_hs256(TEST_SHARED_SECRET);

    let response = app
        .send(
            Request::builder()
                .uri(format!("/panel?lic=none&jwt={token}"))
                .body(Body::empty())?,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_request_bound_route_checks_method_and_query() -> Result<()> {
    let app = TestApp::new(tenant_store());
    let token = ConnectTokenBuilder::new()
        .without_user()
        .bound_to("GET", "/teams", &[("teamId", "42")])
        .sign_hs256(TEST_SHARED_SECRET);

    let response = app.send(get_with_jwt("/teams?teamId=42", &token)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["acting_user_id"].is_null());

    let response = app.send(get_with_jwt("/teams?teamId=7", &token)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let delete = Request::builder()
        .method("DELETE")
        .uri("/teams?teamId=42")
        .header(header::AUTHORIZATION, format!("JWT {token}"))
        .body(Body::empty())?;
    let response = app.send(delete).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn test_request_bound_token_in_query_excluded_from_hash() -> Result<()> {
    let app = TestApp::new(tenant_store());
    let token = ConnectTokenBuilder::new()
        .bound_to("GET", "/teams", &[("teamId", "42")])
        .sign_hs256(TEST_SHARED_SECRET);

    let response = app
        .send(
            Request::builder()
                .uri(format!("/teams?jwt={token}&teamId=42"))
                .body(Body::empty())?,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_request_bound_route_under_nested_router_hashes_full_path() -> Result<()> {
    let verifier = Arc::new(ConnectVerifier::new(
        test_settings(),
        tenant_store(),
        mock_resolver(&[]),
    ));
    let api = Router::new()
        .route("/teams", get(whoami))
        .route_layer(middleware::from_fn_with_state(
            Arc::new(AuthState { verifier }),
            require_request_token,
        ));
    let router = Router::new().nest("/api", api);

    let token = ConnectTokenBuilder::new()
        .bound_to("GET", "/api/teams", &[("teamId", "42")])
        .sign_hs256(TEST_SHARED_SECRET);
    let response = router
        .clone()
        .oneshot(get_with_jwt("/api/teams?teamId=42", &token))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    // A token bound to the nest-relative path was never signed by the product
    let relative = ConnectTokenBuilder::new()
        .bound_to("GET", "/teams", &[("teamId", "42")])
        .sign_hs256(TEST_SHARED_SECRET);
    let response = router
        .oneshot(get_with_jwt("/api/teams?teamId=42", &relative))
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn test_context_token_rejected_on_request_bound_route() -> Result<()> {
    let app = TestApp::new(tenant_store());
    let token = ConnectTokenBuilder::new().sign_hs256(TEST_SHARED_SECRET);

    let response = app.send(get_with_jwt("/teams?teamId=42", &token)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

// ============================================================================
// Public routes
// ============================================================================

#[tokio::test]
async fn test_health_and_metrics_are_public() -> Result<()> {
    let app = TestApp::new(tenant_store());

    let response = app
        .send(Request::builder().uri("/v1/health").body(Body::empty())?)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");

    let response = app
        .send(Request::builder().uri("/metrics").body(Body::empty())?)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}
