//! Middleware for the Connect auth service.
//!
//! # Components
//!
//! - `auth` - Connect JWT middleware, one function per token class

pub mod auth;

pub use auth::{
    request_descriptor, require_context_token, require_lifecycle_token, require_request_token,
    AuthState,
};
