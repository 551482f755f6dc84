//! # Connect Auth Test Utilities
//!
//! Shared test utilities for the `connect-auth` crate.
//!
//! This crate provides:
//! - RSA install-key fixtures (generated once per test process)
//! - A fluent Connect token builder
//! - A wiremock-backed Atlassian install-key server
//! - Fixed test ids and secrets
//! - Verifier and tenant store constructors
//!
//! ## Usage
//!
//! ```rust,ignore
//! use connect_auth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let verifier = verifier_with_tenant();
//!     let token = ConnectTokenBuilder::new()
//!         .bound_to("GET", "/teams", &[("teamId", "42")])
//!         .sign_hs256(TEST_SHARED_SECRET);
//! }
//! ```

pub mod crypto_fixtures;
pub mod harness;
pub mod key_server;
pub mod test_ids;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use harness::*;
pub use key_server::*;
pub use test_ids::*;
pub use token_builders::*;
