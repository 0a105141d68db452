//! Browser login sessions.
//!
//! A session is held entirely by the browser in a signed (and normally
//! encrypted) cookie; the gateway keeps no server-side session table. This
//! module owns the session record, its login state transitions and the
//! payload encoding placed inside the cookie. Sealing the payload is the
//! cookie store's job.
//!
//! The record moves through three states:
//!
//! - idle: no `state`, possibly an authenticated `user`
//! - pending: `state`, `nonce` and `pkce_verifier` issued by [`Session::begin_login`]
//! - verified: `user` bound by [`Session::complete_login`], login fields cleared

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use portcullis_core::Identity;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::auth::{AuthorizationRequest, PendingLogin};
use crate::error::{LoginStateError, SessionError};

/// Per-browser session record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// One-time CSRF nonce for the pending login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<String>,
    /// Where to send the browser once the login completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next: Option<String>,
    /// The verified identity, once a login has completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<Identity>,
    /// ID token nonce for the pending login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,
    /// PKCE verifier for the pending login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pkce_verifier: Option<String>,
    /// When the cookie payload stops being accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Creates an empty, unauthenticated session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the verified identity, if a login has completed.
    #[must_use]
    pub fn user(&self) -> Option<&Identity> {
        self.user.as_ref()
    }

    /// Returns true if this session carries a verified identity.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Returns the pending login state nonce.
    #[must_use]
    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    /// Returns the post-login redirect target.
    #[must_use]
    pub fn next(&self) -> Option<&str> {
        self.next.as_deref()
    }

    /// Returns when the decoded payload expires.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Records a new pending login.
    ///
    /// Any earlier pending login is replaced; an existing `user` is kept so
    /// a failed re-login does not sign the browser out.
    pub fn begin_login(&mut self, next: Option<String>, request: &AuthorizationRequest) {
        self.state = Some(request.state.clone());
        self.next = next.filter(|n| !n.is_empty());
        self.nonce = Some(request.nonce.clone());
        self.pkce_verifier = Some(request.pkce_verifier.clone());
    }

    /// Checks a callback's `state` against the pending login.
    ///
    /// An empty stored state counts as no pending login, so a replayed
    /// callback fails once [`Session::complete_login`] has consumed it.
    ///
    /// # Errors
    ///
    /// Returns `NoPendingLogin` when nothing is pending and `StateMismatch`
    /// when the presented state differs from the stored one.
    pub fn pending_login(&self, presented_state: &str) -> Result<PendingLogin, LoginStateError> {
        let (Some(state), Some(nonce), Some(pkce_verifier)) = (
            self.state.as_deref().filter(|s| !s.is_empty()),
            self.nonce.as_deref(),
            self.pkce_verifier.as_deref(),
        ) else {
            return Err(LoginStateError::NoPendingLogin);
        };

        if !bool::from(state.as_bytes().ct_eq(presented_state.as_bytes())) {
            return Err(LoginStateError::StateMismatch);
        }

        Ok(PendingLogin {
            nonce: nonce.to_string(),
            pkce_verifier: pkce_verifier.to_string(),
        })
    }

    /// Binds a verified identity and consumes the pending login.
    ///
    /// Returns the redirect target captured when the login began, or `/`.
    pub fn complete_login(&mut self, identity: Identity) -> String {
        self.user = Some(identity);
        self.state = None;
        self.nonce = None;
        self.pkce_verifier = None;
        self.next
            .take()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "/".to_string())
    }

    /// Encodes the session as a cookie-safe payload valid for `max_age`.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if the record cannot be serialized.
    pub fn encode(&self, now: DateTime<Utc>, max_age: Duration) -> Result<String, SessionError> {
        let mut sealed = self.clone();
        sealed.expires_at = Some(now + max_age);
        let json = serde_json::to_vec(&sealed).map_err(|e| SessionError::Malformed {
            reason: e.to_string(),
        })?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decodes a payload produced by [`Session::encode`].
    ///
    /// # Errors
    ///
    /// Returns `Malformed` for undecodable payloads and `Expired` once the
    /// embedded expiry has passed.
    pub fn decode(payload: &str, now: DateTime<Utc>) -> Result<Self, SessionError> {
        let json = URL_SAFE_NO_PAD
            .decode(payload.trim())
            .map_err(|e| SessionError::Malformed {
                reason: e.to_string(),
            })?;
        let session: Self = serde_json::from_slice(&json).map_err(|e| SessionError::Malformed {
            reason: e.to_string(),
        })?;

        match session.expires_at {
            Some(expired_at) if expired_at <= now => Err(SessionError::Expired { expired_at }),
            Some(_) => Ok(session),
            None => Err(SessionError::Malformed {
                reason: "missing expiry".to_string(),
            }),
        }
    }
}
