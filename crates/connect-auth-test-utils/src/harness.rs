//! Verifier and tenant store constructors for tests

use crate::crypto_fixtures::TestSigningKey;
use crate::test_ids::*;
use connect_auth::auth::keys::mock::MockPublicKeyResolver;
use connect_auth::auth::{ConnectVerifier, PublicKeyResolver, VerifierSettings};
use connect_auth::tenants::{InMemoryTenantStore, Tenant, TenantStore, TenantStoreError};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

/// The tenant that issues tokens built by `ConnectTokenBuilder::new()`.
pub fn test_tenant() -> Tenant {
    Tenant {
        id: TEST_TENANT_ID,
        client_key: TEST_CLIENT_KEY.to_string(),
        shared_secret: SecretString::from(TEST_SHARED_SECRET.to_string()),
        base_url: TEST_PRODUCT_BASE_URL.to_string(),
        display_url: None,
    }
}

/// A second installed tenant with its own secret.
pub fn other_tenant() -> Tenant {
    Tenant {
        id: TEST_OTHER_TENANT_ID,
        client_key: TEST_OTHER_CLIENT_KEY.to_string(),
        shared_secret: SecretString::from(TEST_OTHER_SHARED_SECRET.to_string()),
        base_url: "https://globex.atlassian.net".to_string(),
        display_url: None,
    }
}

/// Store holding both test tenants.
pub fn tenant_store() -> Arc<InMemoryTenantStore> {
    Arc::new(InMemoryTenantStore::with_tenants([test_tenant(), other_tenant()]))
}

/// Settings for [`TEST_APP_BASE_URL`] with short timeouts.
pub fn test_settings() -> VerifierSettings {
    VerifierSettings {
        tenant_lookup_timeout: Duration::from_millis(200),
        key_resolve_timeout: Duration::from_secs(2),
        ..VerifierSettings::new(TEST_APP_BASE_URL)
    }
}

/// Resolver that serves the given fixture keys from memory.
pub fn mock_resolver(keys: &[&TestSigningKey]) -> Arc<MockPublicKeyResolver> {
    Arc::new(MockPublicKeyResolver::with_keys(
        keys.iter().map(|key| (key.kid.clone(), key.public_pem.clone())),
    ))
}

pub fn verifier_with(
    settings: VerifierSettings,
    tenants: Arc<dyn TenantStore>,
    keys: Arc<dyn PublicKeyResolver>,
) -> ConnectVerifier {
    ConnectVerifier::new(settings, tenants, keys)
}

/// Verifier over [`tenant_store`] with no install keys.
pub fn verifier_with_tenant() -> ConnectVerifier {
    verifier_with(test_settings(), tenant_store(), mock_resolver(&[]))
}

/// Tenant store that never answers within any sane timeout.
pub struct SlowTenantStore {
    pub delay: Duration,
}

#[async_trait::async_trait]
impl TenantStore for SlowTenantStore {
    async fn get_by_client_key(&self, _client_key: &str) -> Result<Tenant, TenantStoreError> {
        tokio::time::sleep(self.delay).await;
        Ok(test_tenant())
    }
}
