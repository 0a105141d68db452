//! OIDC (OpenID Connect) identity provider configuration.
//!
//! This module describes how the gateway talks to the external identity
//! provider that performs single sign-on for browser clients.

use serde::{Deserialize, Serialize};

/// Configuration for the OIDC identity provider.
///
/// Fields with defaults can be omitted when loading from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// The OIDC issuer URL (e.g., "https://auth.example.com/realms/main").
    /// Used for OIDC discovery.
    issuer_url: String,
    /// The OAuth2 client ID registered with the provider.
    client_id: String,
    /// The OAuth2 client secret.
    client_secret: String,
    /// The redirect URI for the OAuth2 callback, normally
    /// `https://<gateway host>/oidc`.
    redirect_uri: String,
    /// OAuth2 scopes to request as a comma-separated string.
    /// Default: "openid,email"
    #[serde(default = "default_scopes")]
    scopes: String,
    /// The ID token claim used as the caller identity.
    /// Default: "email"
    #[serde(default = "default_identity_claim")]
    identity_claim: String,
}

fn default_scopes() -> String {
    "openid,email".to_string()
}

fn default_identity_claim() -> String {
    "email".to_string()
}

impl OidcConfig {
    /// Creates a new OIDC configuration with defaults for optional fields.
    #[must_use]
    pub fn new(
        issuer_url: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Self {
        Self {
            issuer_url,
            client_id,
            client_secret,
            redirect_uri,
            scopes: default_scopes(),
            identity_claim: default_identity_claim(),
        }
    }

    /// Returns the OIDC issuer URL.
    #[must_use]
    pub fn issuer_url(&self) -> &str {
        &self.issuer_url
    }

    /// Returns the OAuth2 client ID.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the OAuth2 client secret.
    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    /// Returns the OAuth2 redirect URI.
    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Returns the OAuth2 scopes to request, parsed from comma-separated string.
    ///
    /// `openid` is always the first scope; blank entries are dropped.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        let mut scopes = vec!["openid"];
        for scope in self.scopes.split(',').map(str::trim) {
            if !scope.is_empty() && !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }
        scopes
    }

    /// Returns the name of the claim used as the caller identity.
    #[must_use]
    pub fn identity_claim(&self) -> IdentityClaim {
        IdentityClaim::from_name(&self.identity_claim)
    }

    /// Sets the scopes to request.
    #[must_use]
    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.scopes = scopes.join(",");
        self
    }

    /// Sets the claim used as the caller identity.
    #[must_use]
    pub fn with_identity_claim(mut self, claim: &str) -> Self {
        self.identity_claim = claim.to_string();
        self
    }
}

/// The ID token claim the gateway treats as the caller's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityClaim {
    /// The `email` claim.
    Email,
    /// The `sub` claim.
    Subject,
    /// The `preferred_username` claim.
    PreferredUsername,
}

impl IdentityClaim {
    fn from_name(name: &str) -> Self {
        match name.trim() {
            "sub" | "subject" => Self::Subject,
            "preferred_username" => Self::PreferredUsername,
            _ => Self::Email,
        }
    }

    /// Returns the claim name as it appears in the ID token.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Subject => "sub",
            Self::PreferredUsername => "preferred_username",
        }
    }
}
