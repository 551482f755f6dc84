//! Atlassian Connect inbound request authentication.
//!
//! Verifies the JWTs Jira Cloud attaches to every request it sends a Connect
//! app, under three schemes:
//!
//! - context tokens: HS256 with the tenant's shared secret, `qsh = "context-qsh"`
//! - request-bound tokens: HS256, `qsh` = hash of the exact request
//! - lifecycle callbacks: RS256 with an Atlassian install key, `aud` = app base URL
//!
//! # Modules
//!
//! - `auth` - Codec, QSH, policies, install keys, verifier
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - Health, metrics and lifecycle handlers
//! - `middleware` - Axum middleware per token class
//! - `observability` - Metric definitions
//! - `routes` - Axum router setup
//! - `tenants` - Tenant lookup and registration

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
pub mod tenants;
