//! Inbound Atlassian Connect JWT verification.
//!
//! - `codec` - JWT structure and signature checks
//! - `claims` - claim shape validation
//! - `qsh` - request canonicalization and query string hashes
//! - `policy` - key source and QSH rule per token class
//! - `keys` - Atlassian install-key fetching and caching
//! - `verifier` - the verification pipeline

pub mod claims;
pub mod codec;
pub mod keys;
pub mod policy;
pub mod qsh;
pub mod verifier;

pub use claims::ConnectClaims;
pub use keys::{CachedPublicKeyResolver, HttpPublicKeyResolver, KeyFetchError, PublicKeyResolver};
pub use policy::{KeyPolicy, QshPolicy, VerificationPolicy};
pub use qsh::{compute_qsh, RequestCanonicalizer, RequestDescriptor, CONTEXT_QSH};
pub use verifier::{
    check_expiry_at, ConnectVerifier, VerifiedIdentity, VerifiedInstallation, VerifiedToken,
    VerifierSettings,
};
