//! Error types for the access crate.
//!
//! - `SessionError`: a session cookie could not be turned into a session
//! - `LoginStateError`: a login callback did not match the pending login
//! - `VerificationError`: the identity provider refused the callback
//! - `CatalogError`: an allow-list, routing or token document was invalid

use chrono::{DateTime, Utc};
use std::fmt;

/// Errors from decoding a session cookie.
///
/// Every variant means "no session"; callers decide whether that is fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The request carried no session cookie.
    Missing,
    /// The cookie failed signature or decryption checks.
    Tampered,
    /// The cookie authenticated but its payload could not be decoded.
    Malformed { reason: String },
    /// The payload is older than the configured max-age.
    Expired { expired_at: DateTime<Utc> },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "no session cookie"),
            Self::Tampered => write!(f, "session cookie failed verification"),
            Self::Malformed { reason } => write!(f, "malformed session cookie: {reason}"),
            Self::Expired { expired_at } => {
                write!(f, "session expired at {}", expired_at.to_rfc3339())
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Errors from matching a login callback against the browser's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStateError {
    /// The session holds no pending login (never started, or already consumed).
    NoPendingLogin,
    /// The callback state does not equal the stored state.
    StateMismatch,
}

impl fmt::Display for LoginStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPendingLogin => write!(f, "no login pending for this browser"),
            Self::StateMismatch => write!(f, "login state does not match this browser"),
        }
    }
}

impl std::error::Error for LoginStateError {}

/// Errors from exchanging an authorization code for a verified identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// The callback carried no authorization code.
    MissingCode,
    /// The token endpoint rejected the code or could not be reached.
    Exchange { reason: String },
    /// The ID token failed validation.
    InvalidToken { reason: String },
    /// The ID token lacks the claim used as the identity.
    MissingClaim { claim: String },
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCode => write!(f, "missing authorization code"),
            Self::Exchange { reason } => write!(f, "token exchange failed: {reason}"),
            Self::InvalidToken { reason } => write!(f, "invalid ID token: {reason}"),
            Self::MissingClaim { claim } => write!(f, "missing required claim: {claim}"),
        }
    }
}

impl std::error::Error for VerificationError {}

/// Errors from parsing catalog documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// A document was not valid JSON of the expected shape.
    InvalidDocument { document: String, reason: String },
    /// A routing entry does not point at an HTTP(S) backend.
    InvalidRoute { host: String, reason: String },
    /// A token entry maps to an empty identity.
    InvalidToken { reason: String },
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDocument { document, reason } => {
                write!(f, "invalid {document} document: {reason}")
            }
            Self::InvalidRoute { host, reason } => {
                write!(f, "invalid route for '{host}': {reason}")
            }
            Self::InvalidToken { reason } => write!(f, "invalid token entry: {reason}"),
        }
    }
}

impl std::error::Error for CatalogError {}
