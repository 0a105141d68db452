//! Centralized gateway configuration.
//!
//! Every option is read once at startup from `PORTCULLIS__*` environment
//! variables (for example `PORTCULLIS__COOKIE__DOMAIN`) and handed to the
//! components that need it. Nothing reads the environment afterwards.
//!
//! See [`OidcConfig`](portcullis_access::OidcConfig) for the identity
//! provider options.

use axum::http::StatusCode;
use config::ConfigError;
use portcullis_access::{DEFAULT_CHALLENGE_STATUS, OidcConfig};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PORTCULLIS";

/// Minimum combined length of the cookie keys.
pub const MIN_KEY_BYTES: usize = 64;

/// Gateway configuration composed from the component configs.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Socket address to listen on.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// The gateway's own host name, where `/launch` and `/oidc` are served.
    pub host: String,

    /// Health check configuration.
    #[serde(default)]
    pub health: HealthConfig,

    /// Session cookie configuration.
    pub cookie: CookieConfig,

    /// Login challenge configuration.
    #[serde(default)]
    pub challenge: ChallengeConfig,

    /// OIDC authentication configuration.
    pub oidc: OidcConfig,

    /// Outbound HTTP settings for backends and the identity provider.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Allow-list, routing table and token sources.
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_path")]
    pub path: String,
    #[serde(default = "default_health_reply")]
    pub reply: String,
}

/// Session cookie settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    /// Cookie name.
    #[serde(default = "default_cookie_name")]
    pub name: String,

    /// Domain the cookie is scoped to. Empty means host-only.
    pub domain: String,

    /// Lifetime of the cookie after each save, in seconds.
    #[serde(default = "default_cookie_max_age_seconds")]
    pub max_age_seconds: i64,

    /// First half of the key material.
    pub key1: String,

    /// Second half of the key material.
    pub key2: String,

    /// Encrypt the payload (`true`) or only sign it (`false`).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// Whether to set the Secure flag (requires HTTPS).
    /// Set to false for local HTTP development.
    #[serde(default = "default_true")]
    pub secure: bool,
}

/// Login challenge settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeConfig {
    /// Status code written on a challenge.
    #[serde(default = "default_challenge_status")]
    pub status: u16,

    /// Body returned for a host with no backend route.
    #[serde(default = "default_unlisted_message")]
    pub unlisted_message: String,
}

/// Outbound HTTP client settings.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Skip TLS certificate verification towards backends and the identity provider.
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Whole-request timeout for identity provider and catalog calls, and
    /// the idle read timeout for proxied responses.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_connect_timeout_seconds")]
    pub connect_timeout_seconds: u64,

    /// Accepted for compatibility. Websocket frames are always relayed
    /// uncompressed.
    #[serde(default)]
    pub websocket_compression: bool,
}

/// Catalog source locations.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Allow-listed hosts (JSON array), as an `http(s)://` URL or a file path.
    #[serde(default)]
    pub allowlist: Option<String>,

    /// Host to backend routes (JSON object).
    #[serde(default)]
    pub routes: Option<String>,

    /// Static token to identity map (JSON object).
    #[serde(default)]
    pub tokens: Option<String>,

    /// Interval between refreshes, in seconds.
    #[serde(default = "default_refresh_seconds")]
    pub refresh_seconds: u64,
}

fn default_listen() -> String {
    "0.0.0.0:80".to_string()
}

fn default_health_path() -> String {
    "/healthz/ping".to_string()
}

fn default_health_reply() -> String {
    "ok".to_string()
}

fn default_cookie_name() -> String {
    "portcullis".to_string()
}

fn default_cookie_max_age_seconds() -> i64 {
    6 * 60 * 60
}

fn default_true() -> bool {
    true
}

fn default_challenge_status() -> u16 {
    DEFAULT_CHALLENGE_STATUS
}

fn default_unlisted_message() -> String {
    "This host is not served by this gateway.".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_connect_timeout_seconds() -> u64 {
    5
}

fn default_refresh_seconds() -> u64 {
    60
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            path: default_health_path(),
            reply: default_health_reply(),
        }
    }
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            status: default_challenge_status(),
            unlisted_message: default_unlisted_message(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            insecure_skip_verify: false,
            timeout_seconds: default_timeout_seconds(),
            connect_timeout_seconds: default_connect_timeout_seconds(),
            websocket_compression: false,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            allowlist: None,
            routes: None,
            tokens: None,
            refresh_seconds: default_refresh_seconds(),
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_environment(config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Loads configuration from an environment source, then validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_environment(environment: config::Environment) -> Result<Self, ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints the deserializer cannot express.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(invalid("host must not be empty"));
        }
        if !self.health.path.starts_with('/') {
            return Err(invalid("health.path must start with '/'"));
        }
        if self.cookie.name.trim().is_empty() {
            return Err(invalid("cookie.name must not be empty"));
        }
        if self.cookie.max_age_seconds <= 0 {
            return Err(invalid("cookie.max_age_seconds must be positive"));
        }
        if self.cookie.key_material().len() < MIN_KEY_BYTES {
            return Err(invalid(format!(
                "cookie.key1 and cookie.key2 must provide at least {MIN_KEY_BYTES} bytes together"
            )));
        }
        if StatusCode::from_u16(self.challenge.status).is_err() {
            return Err(invalid(format!(
                "challenge.status {} is not a valid status code",
                self.challenge.status
            )));
        }
        for (name, value) in [
            ("oidc.issuer_url", self.oidc.issuer_url()),
            ("oidc.redirect_uri", self.oidc.redirect_uri()),
        ] {
            Url::parse(value).map_err(|e| invalid(format!("{name} is not a valid URL: {e}")))?;
        }
        if self.catalog.refresh_seconds == 0 {
            return Err(invalid("catalog.refresh_seconds must be positive"));
        }
        Ok(())
    }
}

impl CookieConfig {
    /// Returns `key1` followed by `key2`.
    #[must_use]
    pub fn key_material(&self) -> Vec<u8> {
        [self.key1.as_bytes(), self.key2.as_bytes()].concat()
    }
}

impl UpstreamConfig {
    /// Client for the identity provider and catalog sources.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        self.client_builder()
            .timeout(Duration::from_secs(self.timeout_seconds))
            .build()
    }

    /// Client for proxied backend requests.
    ///
    /// Responses may stream for a long time, so only idle reads are bounded.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn proxy_client(&self) -> reqwest::Result<reqwest::Client> {
        self.client_builder()
            .read_timeout(Duration::from_secs(self.timeout_seconds))
            .build()
    }

    fn client_builder(&self) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(self.connect_timeout_seconds))
            .danger_accept_invalid_certs(self.insecure_skip_verify)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Message(message.into())
}
