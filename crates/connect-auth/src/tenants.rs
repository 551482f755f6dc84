//! Tenant (Connect installation) storage.
//!
//! The verifier only reads tenants through [`TenantStore`]. Lifecycle
//! handlers write through [`TenantRegistry`]. [`InMemoryTenantStore`] backs
//! the binary and the tests; a persistent store implements the same traits.

use secrecy::SecretString;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One Connect installation.
///
/// `shared_secret` is a `SecretString`, so `Debug` output never contains it.
#[derive(Debug, Clone)]
pub struct Tenant {
    /// Stable id, preserved across reinstalls.
    pub id: Uuid,

    /// Atlassian's identifier for the installation; the `iss` of its tokens.
    pub client_key: String,

    /// HS256 secret for tokens issued by this installation.
    pub shared_secret: SecretString,

    /// Product base URL, e.g. `https://example.atlassian.net`.
    pub base_url: String,

    pub display_url: Option<String>,
}

/// Data carried by an install callback.
#[derive(Debug, Clone)]
pub struct InstallRegistration {
    pub client_key: String,
    pub shared_secret: SecretString,
    pub base_url: String,
    pub display_url: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TenantStoreError {
    #[error("tenant not found: {0}")]
    NotFound(String),

    #[error("tenant store backend failure: {0}")]
    Backend(String),
}

/// Read-side tenant lookup used during verification.
#[async_trait::async_trait]
pub trait TenantStore: Send + Sync {
    async fn get_by_client_key(&self, client_key: &str) -> Result<Tenant, TenantStoreError>;
}

/// Write-side extension used by lifecycle handlers.
#[async_trait::async_trait]
pub trait TenantRegistry: TenantStore {
    /// Create the tenant, or overwrite it in place on reinstall.
    async fn upsert(&self, registration: InstallRegistration) -> Result<Tenant, TenantStoreError>;

    /// Delete the tenant. Returns whether it existed.
    async fn remove(&self, client_key: &str) -> Result<bool, TenantStoreError>;
}

#[derive(Default)]
pub struct InMemoryTenantStore {
    tenants: RwLock<HashMap<String, Tenant>>,
}

impl InMemoryTenantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-built tenants.
    pub fn with_tenants(tenants: impl IntoIterator<Item = Tenant>) -> Self {
        Self {
            tenants: RwLock::new(
                tenants
                    .into_iter()
                    .map(|tenant| (tenant.client_key.clone(), tenant))
                    .collect(),
            ),
        }
    }

    pub async fn len(&self) -> usize {
        self.tenants.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tenants.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl TenantStore for InMemoryTenantStore {
    async fn get_by_client_key(&self, client_key: &str) -> Result<Tenant, TenantStoreError> {
        self.tenants
            .read()
            .await
            .get(client_key)
            .cloned()
            .ok_or_else(|| TenantStoreError::NotFound(client_key.to_string()))
    }
}

#[async_trait::async_trait]
impl TenantRegistry for InMemoryTenantStore {
    async fn upsert(&self, registration: InstallRegistration) -> Result<Tenant, TenantStoreError> {
        let mut tenants = self.tenants.write().await;

        let id = tenants
            .get(&registration.client_key)
            .map(|existing| existing.id)
            .unwrap_or_else(Uuid::new_v4);

        let tenant = Tenant {
            id,
            client_key: registration.client_key,
            shared_secret: registration.shared_secret,
            base_url: registration.base_url,
            display_url: registration.display_url,
        };
        tenants.insert(tenant.client_key.clone(), tenant.clone());

        Ok(tenant)
    }

    async fn remove(&self, client_key: &str) -> Result<bool, TenantStoreError> {
        Ok(self.tenants.write().await.remove(client_key).is_some())
    }
}
