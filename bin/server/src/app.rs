//! Shared application state and the HTTP router.

use axum::{
    Router,
    body::Body,
    http::{HeaderName, HeaderValue, Request, header},
};
use portcullis_access::{IdentityProvider, NO_CACHE};
use portcullis_core::RequestId;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    set_header::{SetRequestHeaderLayer, SetResponseHeaderLayer},
    trace::TraceLayer,
};
use tracing::{Span, debug_span};

use crate::auth::SessionStore;
use crate::catalog::CatalogHandle;
use crate::config::GatewayConfig;
use crate::gateway;
use crate::proxy::Upstream;

const X_REQUEST_ID: &str = "x-request-id";

/// Shared application state.
pub struct AppState {
    /// Configuration loaded at startup.
    pub config: GatewayConfig,
    /// Session cookie reader and writer.
    pub sessions: SessionStore,
    /// Identity provider for browser logins.
    pub identity_provider: Arc<dyn IdentityProvider>,
    /// Current allow-list, routes and tokens.
    pub catalog: CatalogHandle,
    /// Data path for approved requests.
    pub upstream: Arc<dyn Upstream>,
}

/// Builds the gateway router.
///
/// Every request goes through [`gateway::dispatch`]. Every response, proxied
/// ones included, leaves with the no-cache `Cache-Control` value so shared
/// caches never keep content that sat behind an access decision.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new().fallback(gateway::dispatch).with_state(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static(X_REQUEST_ID),
                |_req: &_| HeaderValue::from_str(&RequestId::new().to_string()).ok(),
            ))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(SetResponseHeaderLayer::overriding(
                header::CACHE_CONTROL,
                HeaderValue::from_static(NO_CACHE),
            )),
    )
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none");
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    debug_span!(
        "http-request",
        method = %request.method(),
        host,
        path = request.uri().path(),
        request_id
    )
}
