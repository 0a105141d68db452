//! Forwarding approved requests to their backends.
//!
//! The dispatcher hands every allow-listed or authenticated request to an
//! [`Upstream`]. [`HttpProxy`] is the production implementation: it looks
//! up the backend for the requested host, re-issues the request with
//! reqwest and streams the response back. Websocket upgrades are relayed
//! by [`websocket`].

pub mod websocket;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request},
    http::{HeaderMap, HeaderName, HeaderValue, header},
    response::{IntoResponse, Response},
};
use portcullis_core::Identity;
use std::net::SocketAddr;
use tokio_tungstenite::Connector;
use url::Url;

use crate::catalog::CatalogHandle;
use crate::error::ProxyError;
use crate::gateway::request_host;

/// Why a request was let through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// The host is reachable without authentication.
    AllowListed,
    /// The caller presented a valid session or token.
    Authenticated(Identity),
}

/// The data path for approved requests.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Forwards a request and returns the backend's response.
    async fn forward(&self, request: Request, grant: Grant) -> Response;
}

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Reverse proxy over the catalog's routing table.
pub struct HttpProxy {
    client: reqwest::Client,
    websocket_tls: Option<Connector>,
    catalog: CatalogHandle,
    unlisted_message: String,
}

impl HttpProxy {
    /// `websocket_tls` of `None` keeps default certificate checks for `wss://` backends.
    pub fn new(
        client: reqwest::Client,
        websocket_tls: Option<Connector>,
        catalog: CatalogHandle,
        unlisted_message: String,
    ) -> Self {
        Self {
            client,
            websocket_tls,
            catalog,
            unlisted_message,
        }
    }

    async fn proxy(&self, request: Request, grant: &Grant) -> Result<Response, ProxyError> {
        let host = request_host(&request);
        let backend = self
            .catalog
            .snapshot()
            .backend_for(&host)
            .cloned()
            .ok_or_else(|| ProxyError::UnlistedHost {
                host: host.clone(),
                message: self.unlisted_message.clone(),
            })?;

        if let Grant::Authenticated(identity) = grant {
            tracing::debug!(host = %host, identity = %identity, "forwarding request");
        } else {
            tracing::debug!(host = %host, "forwarding allow-listed request");
        }

        if websocket::is_upgrade(request.headers()) {
            return websocket::relay(request, &backend, &host, self.websocket_tls.clone()).await;
        }

        let target = backend_url(&backend, request.uri().path(), request.uri().query());
        let headers = forwarded_headers(&request, &host);
        let method = request.method().clone();
        let body = reqwest::Body::wrap_stream(request.into_body().into_data_stream());

        let response = self
            .client
            .request(method, target)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| ProxyError::Backend {
                host: host.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut proxied = Body::from_stream(response.bytes_stream()).into_response();
        *proxied.status_mut() = status;
        *proxied.headers_mut() = headers;
        Ok(proxied)
    }
}

#[async_trait]
impl Upstream for HttpProxy {
    async fn forward(&self, request: Request, grant: Grant) -> Response {
        match self.proxy(request, &grant).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        }
    }
}

/// Joins the backend base URL with the request path and query.
pub(crate) fn backend_url(backend: &Url, path: &str, query: Option<&str>) -> Url {
    let mut target = backend.clone();
    let base = backend.path().trim_end_matches('/');
    target.set_path(&format!("{base}{path}"));
    target.set_query(query);
    target
}

/// Copies the end-to-end request headers and adds the `X-Forwarded-*` set.
fn forwarded_headers(request: &Request, host: &str) -> HeaderMap {
    let mut headers = request.headers().clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);

    if let Ok(value) = HeaderValue::from_str(host) {
        headers.insert(X_FORWARDED_HOST.clone(), value);
    }
    headers.insert(X_FORWARDED_PROTO.clone(), HeaderValue::from_static("https"));

    if let Some(ConnectInfo(peer)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        let client = peer.ip().to_string();
        let chain = match headers
            .get(&X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
        {
            Some(prior) if !prior.trim().is_empty() => format!("{prior}, {client}"),
            _ => client,
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR.clone(), value);
        }
    }

    headers
}

/// Removes hop-by-hop headers, including any named by `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
