//! RSA install-key fixtures
//!
//! 2048-bit keys are slow to generate, so each fixture is generated once per
//! test process and shared. Public keys are SPKI PEM, the format Atlassian's
//! install-key service publishes.

use jsonwebtoken::EncodingKey;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
use rsa::pkcs8::EncodePublicKey;
use rsa::rand_core::OsRng;
use rsa::RsaPrivateKey;
use std::sync::OnceLock;

use crate::test_ids::{TEST_KEY_ID, TEST_KEY_ID_ROTATED};

/// A signing key standing in for one of Atlassian's install keys.
pub struct TestSigningKey {
    /// Key id placed in the JWT header.
    pub kid: String,

    pub encoding: EncodingKey,

    /// SPKI PEM served by the mock install-key server.
    pub public_pem: String,
}

static INSTALL_KEY: OnceLock<TestSigningKey> = OnceLock::new();
static ROTATED_KEY: OnceLock<TestSigningKey> = OnceLock::new();
static ROGUE_KEY: OnceLock<TestSigningKey> = OnceLock::new();

/// The key Atlassian signs lifecycle callbacks with.
pub fn install_signing_key() -> &'static TestSigningKey {
    INSTALL_KEY.get_or_init(|| generate(TEST_KEY_ID))
}

/// A second published key, for rotation tests.
pub fn rotated_signing_key() -> &'static TestSigningKey {
    ROTATED_KEY.get_or_init(|| generate(TEST_KEY_ID_ROTATED))
}

/// An attacker's key that claims the published key id.
///
/// Tokens signed with it carry `kid = TEST_KEY_ID` but must fail verification.
pub fn rogue_signing_key() -> &'static TestSigningKey {
    ROGUE_KEY.get_or_init(|| generate(TEST_KEY_ID))
}

fn generate(kid: &str) -> TestSigningKey {
    let mut rng = OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("RSA key generation");

    let private_pem = private_key
        .to_pkcs1_pem(LineEnding::LF)
        .expect("private key PEM");
    let public_pem = private_key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .expect("public key PEM");

    let encoding = EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("encoding key");

    TestSigningKey {
        kid: kid.to_string(),
        encoding,
        public_pem,
    }
}
