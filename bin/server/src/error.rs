//! Errors surfaced to HTTP clients.
//!
//! Each variant maps to one status code. Bodies are escaped HTML pages that
//! carry no internal detail beyond the identity provider's own message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use portcullis_access::{LoginStateError, SessionError, VerificationError};
use std::fmt;

use crate::pages::error_page;

/// Failures of the `/launch` and `/oidc` handlers.
#[derive(Debug)]
pub enum FlowError {
    /// The callback arrived without a usable session cookie.
    SessionUnavailable(SessionError),
    /// The callback's `state` does not match the session.
    InvalidBrowserState(LoginStateError),
    /// The identity provider rejected the authorization code.
    Verification(VerificationError),
    /// The OS random source failed while generating a login state.
    Randomness { details: String },
    /// The session could not be written back to the cookie.
    SessionWrite(SessionError),
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionUnavailable(e) => write!(f, "session unavailable: {e}"),
            Self::InvalidBrowserState(e) => write!(f, "invalid browser state: {e}"),
            Self::Verification(e) => write!(f, "{e}"),
            Self::Randomness { details } => write!(f, "random source failed: {details}"),
            Self::SessionWrite(e) => write!(f, "failed to write session: {e}"),
        }
    }
}

impl std::error::Error for FlowError {}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        match self {
            Self::SessionUnavailable(e) => {
                tracing::debug!(error = %e, "callback without a usable session");
                error_page(StatusCode::BAD_REQUEST, "Login failed", &e.to_string())
            }
            Self::InvalidBrowserState(e) => {
                tracing::warn!(error = %e, "login state mismatch");
                error_page(StatusCode::FORBIDDEN, "Login failed", "invalid browser state")
            }
            Self::Verification(e) => {
                tracing::warn!(error = %e, "identity verification failed");
                error_page(StatusCode::BAD_REQUEST, "Login failed", &e.to_string())
            }
            Self::Randomness { details } => {
                tracing::error!(error = %details, "random source failed");
                error_page(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    "please try again later",
                )
            }
            Self::SessionWrite(e) => {
                tracing::error!(error = %e, "failed to encode session");
                error_page(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    "please try again later",
                )
            }
        }
    }
}

/// Failures on the forwarding path.
#[derive(Debug)]
pub enum ProxyError {
    /// No backend route exists for the requested host.
    UnlistedHost { host: String, message: String },
    /// The backend could not be reached or failed mid-response.
    Backend { host: String, reason: String },
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnlistedHost { host, .. } => write!(f, "no backend route for '{host}'"),
            Self::Backend { host, reason } => write!(f, "backend for '{host}' failed: {reason}"),
        }
    }
}

impl std::error::Error for ProxyError {}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            Self::UnlistedHost { host, message } => {
                tracing::debug!(host = %host, "request for unrouted host");
                error_page(StatusCode::NOT_FOUND, "Not found", &message)
            }
            Self::Backend { host, reason } => {
                tracing::warn!(host = %host, error = %reason, "backend request failed");
                error_page(
                    StatusCode::BAD_GATEWAY,
                    "Bad gateway",
                    "the backend service is unavailable",
                )
            }
        }
    }
}
