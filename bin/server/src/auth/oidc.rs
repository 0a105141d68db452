//! OIDC identity provider built on the openidconnect crate.

use async_trait::async_trait;
use openidconnect::core::{CoreAuthenticationFlow, CoreClient, CoreProviderMetadata};
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, IssuerUrl, Nonce, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, Scope, TokenResponse,
};
use portcullis_access::{
    AuthorizationRequest, IdentityClaim, IdentityProvider, OidcConfig, PendingLogin,
    VerificationError,
};
use portcullis_core::Identity;
use std::fmt;
use std::sync::{Arc, RwLock};

/// OIDC client used for browser logins.
///
/// Provider metadata is discovered at startup and can be re-discovered in
/// the background; a failed re-discovery keeps the previous metadata.
pub struct OidcClient {
    provider_metadata: RwLock<Arc<CoreProviderMetadata>>,
    issuer_url: IssuerUrl,
    client_id: ClientId,
    client_secret: ClientSecret,
    redirect_url: RedirectUrl,
    config: OidcConfig,
    http_client: reqwest::Client,
}

impl OidcClient {
    /// Creates a new OIDC client by discovering the provider metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or discovery fails.
    #[tracing::instrument(skip_all, fields(issuer = %config.issuer_url()))]
    pub async fn discover(
        config: OidcConfig,
        http_client: reqwest::Client,
    ) -> Result<Self, OidcError> {
        let issuer_url = issuer_url(&config)?;
        let provider_metadata = CoreProviderMetadata::discover_async(issuer_url, &http_client)
            .await
            .map_err(|e| OidcError::Discovery(format!("failed to discover provider: {e}")))?;

        Self::from_metadata(config, provider_metadata, http_client)
    }

    /// Creates a client from already-known provider metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the issuer or redirect URI is invalid.
    pub fn from_metadata(
        config: OidcConfig,
        provider_metadata: CoreProviderMetadata,
        http_client: reqwest::Client,
    ) -> Result<Self, OidcError> {
        let issuer_url = issuer_url(&config)?;
        let redirect_url = RedirectUrl::new(config.redirect_uri().to_string())
            .map_err(|e| OidcError::Configuration(format!("invalid redirect URI: {e}")))?;

        Ok(Self {
            provider_metadata: RwLock::new(Arc::new(provider_metadata)),
            issuer_url,
            client_id: ClientId::new(config.client_id().to_string()),
            client_secret: ClientSecret::new(config.client_secret().to_string()),
            redirect_url,
            config,
            http_client,
        })
    }

    /// Re-discovers provider metadata, replacing the current copy on success.
    ///
    /// # Errors
    ///
    /// Returns an error if discovery fails; the previous metadata stays in use.
    #[tracing::instrument(skip_all, fields(issuer = %self.config.issuer_url()))]
    pub async fn refresh_metadata(&self) -> Result<(), OidcError> {
        let provider_metadata =
            CoreProviderMetadata::discover_async(self.issuer_url.clone(), &self.http_client)
                .await
                .map_err(|e| OidcError::Discovery(format!("failed to discover provider: {e}")))?;

        if let Ok(mut current) = self.provider_metadata.write() {
            *current = Arc::new(provider_metadata);
            tracing::debug!("OIDC provider metadata refreshed");
        }
        Ok(())
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    fn metadata(&self) -> Arc<CoreProviderMetadata> {
        match self.provider_metadata.read() {
            Ok(metadata) => metadata.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl IdentityProvider for OidcClient {
    fn authorization_request(&self, state: &str) -> AuthorizationRequest {
        let client = CoreClient::from_provider_metadata(
            (*self.metadata()).clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let state = state.to_string();

        let mut auth_request = client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                move || CsrfToken::new(state),
                Nonce::new_random,
            )
            .set_pkce_challenge(pkce_challenge)
            .add_extra_param("access_type", "offline");

        // `openid` is added by the client itself
        for scope in self.config.scopes().into_iter().filter(|s| *s != "openid") {
            auth_request = auth_request.add_scope(Scope::new(scope.to_string()));
        }

        let (auth_url, csrf_token, nonce) = auth_request.url();

        AuthorizationRequest {
            url: auth_url.to_string(),
            state: csrf_token.secret().clone(),
            nonce: nonce.secret().clone(),
            pkce_verifier: pkce_verifier.secret().clone(),
        }
    }

    async fn verify(
        &self,
        code: &str,
        pending: &PendingLogin,
    ) -> Result<Identity, VerificationError> {
        let client = CoreClient::from_provider_metadata(
            (*self.metadata()).clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone());

        let token_response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|e| VerificationError::Exchange {
                reason: format!("token endpoint error: {e}"),
            })?
            .set_pkce_verifier(PkceCodeVerifier::new(pending.pkce_verifier.clone()))
            .request_async(&self.http_client)
            .await
            .map_err(|e| VerificationError::Exchange {
                reason: format!("token exchange failed: {e}"),
            })?;

        let id_token = token_response
            .id_token()
            .ok_or_else(|| VerificationError::InvalidToken {
                reason: "no ID token in response".to_string(),
            })?;

        let nonce = Nonce::new(pending.nonce.clone());
        let claims = id_token
            .claims(&client.id_token_verifier(), &nonce)
            .map_err(|e| VerificationError::InvalidToken {
                reason: format!("ID token validation failed: {e}"),
            })?;

        let claim = self.config.identity_claim();
        let value = match claim {
            IdentityClaim::Email => claims.email().map(|e| e.as_str().to_string()),
            IdentityClaim::Subject => Some(claims.subject().as_str().to_string()),
            IdentityClaim::PreferredUsername => {
                claims.preferred_username().map(|u| u.as_str().to_string())
            }
        };

        value
            .and_then(Identity::new)
            .ok_or_else(|| VerificationError::MissingClaim {
                claim: claim.as_str().to_string(),
            })
    }
}

fn issuer_url(config: &OidcConfig) -> Result<IssuerUrl, OidcError> {
    IssuerUrl::new(config.issuer_url().to_string())
        .map_err(|e| OidcError::Configuration(format!("invalid issuer URL: {e}")))
}

/// OIDC setup errors.
#[derive(Debug)]
pub enum OidcError {
    /// Configuration error (invalid URLs, etc.)
    Configuration(String),
    /// Failed to discover provider metadata.
    Discovery(String),
}

impl fmt::Display for OidcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "OIDC configuration error: {msg}"),
            Self::Discovery(msg) => write!(f, "OIDC discovery error: {msg}"),
        }
    }
}

impl std::error::Error for OidcError {}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn metadata(token_endpoint: &str) -> CoreProviderMetadata {
        serde_json::from_value(serde_json::json!({
            "issuer": "https://idp.example.com",
            "authorization_endpoint": "https://idp.example.com/authorize",
            "token_endpoint": token_endpoint,
            "jwks_uri": "https://idp.example.com/jwks",
            "response_types_supported": ["code"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256"]
        }))
        .expect("provider metadata")
    }

    fn client(token_endpoint: &str) -> OidcClient {
        let config = OidcConfig::new(
            "https://idp.example.com".to_string(),
            "portcullis".to_string(),
            "hunter2".to_string(),
            "https://gate.example.com/oidc".to_string(),
        )
        .with_scopes(&["openid", "email", "profile"]);
        OidcClient::from_metadata(config, metadata(token_endpoint), reqwest::Client::new())
            .expect("client")
    }

    fn query(url: &str) -> Vec<(String, String)> {
        Url::parse(url)
            .expect("authorization URL")
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    fn param<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
        pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn authorization_request_embeds_state_and_offline_access() {
        let request = client("https://idp.example.com/token").authorization_request("abc123");
        let pairs = query(&request.url);

        assert!(request.url.starts_with("https://idp.example.com/authorize?"));
        assert_eq!(request.state, "abc123");
        assert_eq!(param(&pairs, "state"), Some("abc123"));
        assert_eq!(param(&pairs, "access_type"), Some("offline"));
        assert_eq!(param(&pairs, "nonce"), Some(request.nonce.as_str()));
        assert_eq!(param(&pairs, "code_challenge_method"), Some("S256"));
        assert_eq!(
            param(&pairs, "redirect_uri"),
            Some("https://gate.example.com/oidc")
        );
        assert_eq!(param(&pairs, "scope"), Some("openid email profile"));
    }

    #[test]
    fn each_request_gets_fresh_nonce_and_verifier() {
        let client = client("https://idp.example.com/token");
        let first = client.authorization_request("s1");
        let second = client.authorization_request("s2");

        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.pkce_verifier, second.pkce_verifier);
    }

    #[tokio::test]
    async fn unreachable_token_endpoint_fails_exchange() {
        let client = client("http://127.0.0.1:9/token");
        let pending = PendingLogin {
            nonce: "n".to_string(),
            pkce_verifier: "v".repeat(43),
        };

        let err = client
            .verify("code", &pending)
            .await
            .expect_err("no token endpoint listening");
        assert!(matches!(err, VerificationError::Exchange { .. }));
    }
}
