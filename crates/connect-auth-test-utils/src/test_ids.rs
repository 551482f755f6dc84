//! Fixed test ids for deterministic tests
//!
//! Using fixed values keeps failures reproducible and log output greppable.

use uuid::Uuid;

// Tenants
pub const TEST_TENANT_ID: Uuid = Uuid::from_u128(1000);
pub const TEST_OTHER_TENANT_ID: Uuid = Uuid::from_u128(1001);

pub const TEST_CLIENT_KEY: &str = "jira:3f8a2c1e-5d4b-4a7f-9e6c-000000000001";
pub const TEST_OTHER_CLIENT_KEY: &str = "jira:3f8a2c1e-5d4b-4a7f-9e6c-000000000002";

pub const TEST_SHARED_SECRET: &str = "tenant-one-shared-secret-0123456789abcdef";
pub const TEST_OTHER_SHARED_SECRET: &str = "tenant-two-shared-secret-fedcba9876543210";

pub const TEST_PRODUCT_BASE_URL: &str = "https://acme.atlassian.net";

// App
pub const TEST_APP_BASE_URL: &str = "https://app.example.com";

// Atlassian install key ids
pub const TEST_KEY_ID: &str = "install-key-2025-01";
pub const TEST_KEY_ID_ROTATED: &str = "install-key-2025-02";

// Acting user
pub const TEST_ACCOUNT_ID: &str = "557058:0b1c2d3e-test-account";
