//! Connect Auth
//!
//! Entry point for the Atlassian Connect authentication service. Serves the
//! lifecycle callbacks that register tenants, plus health and metrics.

use connect_auth::auth::{
    CachedPublicKeyResolver, ConnectVerifier, HttpPublicKeyResolver, VerifierSettings,
};
use connect_auth::config::Config;
use connect_auth::observability::metrics::init_metrics_recorder;
use connect_auth::routes::{self, AppState};
use connect_auth::tenants::InMemoryTenantStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "connect_auth=info,connect=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Connect Auth");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        app_base_url = %config.app_base_url,
        install_keys_url = %config.install_keys_url,
        jwt_leeway_seconds = config.jwt_leeway_seconds,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        e
    })?;

    let http_resolver = Arc::new(HttpPublicKeyResolver::from_config(&config));
    let key_resolver = Arc::new(CachedPublicKeyResolver::from_config(
        http_resolver,
        &config,
    ));

    // Tenants live only as long as the process; a persistent deployment
    // plugs its own TenantRegistry in here.
    let tenant_store = Arc::new(InMemoryTenantStore::new());

    let verifier = Arc::new(ConnectVerifier::new(
        VerifierSettings::from(&config),
        tenant_store.clone(),
        key_resolver,
    ));

    let state = Arc::new(AppState {
        verifier,
        registry: tenant_store,
    });

    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Connect Auth listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Connect Auth shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
