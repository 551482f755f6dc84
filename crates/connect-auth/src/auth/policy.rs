//! Verification policies for the three Connect token classes.
//!
//! A single verifier runs every token through the same pipeline. The policy
//! decides where the key comes from (and therefore which algorithm is legal)
//! and what the `qsh` claim must equal.

use jsonwebtoken::Algorithm;

/// Source of the verification key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPolicy {
    /// HS256 with the shared secret of the tenant named by `iss`.
    TenantSharedSecret,

    /// RS256 with an Atlassian install key selected by the header `kid`.
    AtlassianPublicKey,
}

impl KeyPolicy {
    /// The only algorithm accepted under this policy.
    pub fn algorithm(self) -> Algorithm {
        match self {
            KeyPolicy::TenantSharedSecret => Algorithm::HS256,
            KeyPolicy::AtlassianPublicKey => Algorithm::RS256,
        }
    }
}

/// Required value of the `qsh` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QshPolicy {
    /// The literal `context-qsh` sentinel.
    ContextSentinel,

    /// The hash of the current request. The sentinel is never accepted.
    RequestBound,
}

/// Key source and QSH rule for one token class.
///
/// Only the three constants below exist; fields are private so no other
/// combination can be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationPolicy {
    key: KeyPolicy,
    qsh: QshPolicy,
    name: &'static str,
}

impl VerificationPolicy {
    /// Context tokens issued to the app's iframes.
    pub const CONTEXT: Self = Self {
        key: KeyPolicy::TenantSharedSecret,
        qsh: QshPolicy::ContextSentinel,
        name: "context",
    };

    /// Server-to-server calls from the product, bound to one request.
    pub const REQUEST_BOUND: Self = Self {
        key: KeyPolicy::TenantSharedSecret,
        qsh: QshPolicy::RequestBound,
        name: "request_bound",
    };

    /// Install/uninstall callbacks signed by Atlassian.
    pub const LIFECYCLE: Self = Self {
        key: KeyPolicy::AtlassianPublicKey,
        qsh: QshPolicy::RequestBound,
        name: "lifecycle",
    };

    pub fn key(&self) -> KeyPolicy {
        self.key
    }

    pub fn qsh(&self) -> QshPolicy {
        self.qsh
    }

    /// Bounded label for logs and metrics.
    pub fn name(&self) -> &'static str {
        self.name
    }
}
