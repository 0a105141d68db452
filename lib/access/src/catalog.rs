//! The catalog: allow-listed hosts, backend routes and static access tokens.
//!
//! A `Catalog` is an immutable snapshot. The server refreshes it in the
//! background by building a whole new value and swapping it in, so request
//! handling never observes a partially-updated table.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use portcullis_core::Identity;
use std::collections::{BTreeMap, HashMap, HashSet};
use url::Url;

use crate::error::CatalogError;

/// Immutable view of the gateway's routing data.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    allow_list: HashSet<String>,
    routes: HashMap<String, Url>,
    tokens: HashMap<String, Identity>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a host reachable without authentication.
    #[must_use]
    pub fn with_allowed_host(mut self, host: &str) -> Self {
        self.allow_list.insert(normalize_host(host));
        self
    }

    /// Adds a backend route.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRoute` unless `backend` is an absolute HTTP(S) URL.
    pub fn with_route(mut self, host: &str, backend: &str) -> Result<Self, CatalogError> {
        let url = parse_backend(host, backend)?;
        self.routes.insert(normalize_host(host), url);
        Ok(self)
    }

    /// Adds a static access token.
    #[must_use]
    pub fn with_token(mut self, token: &str, identity: Identity) -> Self {
        self.tokens.insert(token.to_string(), identity);
        self
    }

    /// Builds a catalog from JSON documents.
    ///
    /// - allow-list: `["host", ...]`
    /// - routes: `{"host": "https://backend:8443", ...}`
    /// - tokens: `{"token": "identity", ...}`
    ///
    /// An absent document contributes an empty table.
    ///
    /// # Errors
    ///
    /// Returns an error if any present document is malformed.
    pub fn from_documents(
        allow_list: Option<&[u8]>,
        routes: Option<&[u8]>,
        tokens: Option<&[u8]>,
    ) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();

        if let Some(doc) = allow_list {
            let hosts: Vec<String> = parse_document("allow-list", doc)?;
            for host in hosts.iter().filter(|h| !h.trim().is_empty()) {
                catalog = catalog.with_allowed_host(host);
            }
        }

        if let Some(doc) = routes {
            let entries: BTreeMap<String, String> = parse_document("routes", doc)?;
            for (host, backend) in &entries {
                catalog = catalog.with_route(host, backend)?;
            }
        }

        if let Some(doc) = tokens {
            let entries: BTreeMap<String, String> = parse_document("tokens", doc)?;
            for (token, identity) in entries {
                if token.is_empty() {
                    return Err(CatalogError::InvalidToken {
                        reason: "empty token".to_string(),
                    });
                }
                let identity = Identity::new(identity).ok_or_else(|| CatalogError::InvalidToken {
                    reason: "token maps to an empty identity".to_string(),
                })?;
                catalog = catalog.with_token(&token, identity);
            }
        }

        Ok(catalog)
    }

    /// Returns true if `host` may be reached without authentication.
    #[must_use]
    pub fn is_allow_listed(&self, host: &str) -> bool {
        self.allow_list.contains(&normalize_host(host))
    }

    /// Returns the backend base URL serving `host`.
    #[must_use]
    pub fn backend_for(&self, host: &str) -> Option<&Url> {
        self.routes.get(&normalize_host(host))
    }

    /// Resolves an `Authorization` header value against the static tokens.
    ///
    /// Accepts `Bearer <token>` and `Basic` credentials whose password (or,
    /// when the password is empty, whose username) is a known token.
    #[must_use]
    pub fn authenticate(&self, authorization: &str) -> Option<Identity> {
        let (scheme, credentials) = authorization.trim().split_once(' ')?;
        let credentials = credentials.trim();

        if scheme.eq_ignore_ascii_case("bearer") {
            return self.tokens.get(credentials).cloned();
        }

        if scheme.eq_ignore_ascii_case("basic") {
            let decoded = STANDARD.decode(credentials).ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            let (username, password) = decoded.split_once(':').unwrap_or((&decoded, ""));
            let token = if password.is_empty() { username } else { password };
            return self.tokens.get(token).cloned();
        }

        None
    }

    /// Returns the number of allow-listed hosts.
    #[must_use]
    pub fn allow_listed_count(&self) -> usize {
        self.allow_list.len()
    }

    /// Returns the number of backend routes.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Returns the number of static tokens.
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}

/// Normalizes a `Host` value for comparison.
///
/// Lowercases, drops any port and a trailing dot. Bracketed IPv6 literals
/// keep their brackets.
#[must_use]
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = if let Some(rest) = host.strip_prefix('[') {
        match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        }
    } else {
        match host.rsplit_once(':') {
            Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => host,
        }
    };
    without_port.trim_end_matches('.').to_ascii_lowercase()
}

/// Returns true if two `Host` values name the same host.
#[must_use]
pub fn same_host(a: &str, b: &str) -> bool {
    normalize_host(a) == normalize_host(b)
}

fn parse_document<T: serde::de::DeserializeOwned>(
    document: &str,
    bytes: &[u8],
) -> Result<T, CatalogError> {
    serde_json::from_slice(bytes).map_err(|e| CatalogError::InvalidDocument {
        document: document.to_string(),
        reason: e.to_string(),
    })
}

fn parse_backend(host: &str, backend: &str) -> Result<Url, CatalogError> {
    let url = Url::parse(backend).map_err(|e| CatalogError::InvalidRoute {
        host: host.to_string(),
        reason: e.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        scheme => Err(CatalogError::InvalidRoute {
            host: host.to_string(),
            reason: format!("unsupported backend '{scheme}' URL"),
        }),
    }
}
