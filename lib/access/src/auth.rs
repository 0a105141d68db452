//! Login sub-protocol primitives.
//!
//! This module provides:
//! - `IdentityProvider`: the seam to the external OIDC provider
//! - `AuthorizationRequest`: what a login launch hands to the browser and session
//! - `PendingLogin`: the secrets a callback needs to verify the returned code
//! - `generate_state`: the single-use CSRF nonce

use async_trait::async_trait;
use portcullis_core::Identity;

use crate::error::VerificationError;

/// Number of random bytes in a login state nonce.
pub const STATE_BYTES: usize = 32;

/// An authorization request built for one login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    /// The identity provider URL the browser should navigate to.
    pub url: String,
    /// The CSRF state embedded in `url`.
    pub state: String,
    /// The ID token nonce embedded in `url`.
    pub nonce: String,
    /// The PKCE verifier matching the challenge embedded in `url`.
    pub pkce_verifier: String,
}

/// Secrets recorded at launch and needed to verify the callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLogin {
    /// The ID token nonce.
    pub nonce: String,
    /// The PKCE verifier.
    pub pkce_verifier: String,
}

/// External identity provider used by the login flow.
///
/// Implementations perform all network I/O in [`IdentityProvider::verify`];
/// building an authorization request never blocks.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Builds the provider login URL for a login attempt bound to `state`.
    fn authorization_request(&self, state: &str) -> AuthorizationRequest;

    /// Exchanges an authorization code for a verified identity.
    async fn verify(
        &self,
        code: &str,
        pending: &PendingLogin,
    ) -> Result<Identity, VerificationError>;
}

/// Generates a fresh login state: 32 random bytes, hex-encoded.
///
/// # Errors
///
/// Returns an error if the operating system's random source is unavailable.
pub fn generate_state() -> Result<String, getrandom::Error> {
    let mut bytes = [0u8; STATE_BYTES];
    getrandom::fill(&mut bytes)?;
    Ok(hex::encode(bytes))
}
