//! Cookie-backed session storage.
//!
//! The session payload is sealed with axum-extra's private (encrypted and
//! authenticated) or signed jar, depending on `cookie.encrypt`. A cookie
//! that fails either check, or whose embedded expiry has passed, loads as
//! an error the caller treats as "no session".

use anyhow::Context;
use axum::http::HeaderMap;
use axum::response::{IntoResponseParts, ResponseParts};
use axum_extra::extract::cookie::{
    Cookie, CookieJar, Key, PrivateCookieJar, SameSite, SignedCookieJar,
};
use chrono::{DateTime, Duration, Utc};
use portcullis_access::{Session, SessionError};
use std::convert::Infallible;

use crate::config::CookieConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sealing {
    Encrypted,
    Signed,
}

/// Reads and writes the session cookie.
#[derive(Clone)]
pub struct SessionStore {
    key: Key,
    sealing: Sealing,
    name: String,
    domain: String,
    max_age: Duration,
    secure: bool,
}

impl SessionStore {
    /// Creates a store from the cookie configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the key material is shorter than 64 bytes.
    pub fn new(config: &CookieConfig) -> anyhow::Result<Self> {
        let material = config.key_material();
        let key = Key::try_from(material.as_slice())
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("invalid cookie key material")?;

        Ok(Self {
            key,
            sealing: if config.encrypt {
                Sealing::Encrypted
            } else {
                Sealing::Signed
            },
            name: config.name.clone(),
            domain: config.domain.clone(),
            max_age: Duration::seconds(config.max_age_seconds),
            secure: config.secure,
        })
    }

    /// Returns the cookie name.
    pub fn cookie_name(&self) -> &str {
        &self.name
    }

    /// Loads the session carried by a request.
    ///
    /// # Errors
    ///
    /// Returns `Missing`, `Tampered`, `Malformed` or `Expired`; all of them
    /// mean the request has no usable session.
    pub fn load(&self, headers: &HeaderMap) -> Result<Session, SessionError> {
        self.load_at(headers, Utc::now())
    }

    /// Loads the session, starting a fresh one on any failure.
    pub fn load_or_new(&self, headers: &HeaderMap) -> Session {
        self.load(headers).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "starting a fresh session");
            Session::new()
        })
    }

    pub(crate) fn load_at(
        &self,
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> Result<Session, SessionError> {
        if CookieJar::from_headers(headers).get(&self.name).is_none() {
            return Err(SessionError::Missing);
        }

        let cookie = match self.sealing {
            Sealing::Encrypted => {
                PrivateCookieJar::from_headers(headers, self.key.clone()).get(&self.name)
            }
            Sealing::Signed => {
                SignedCookieJar::from_headers(headers, self.key.clone()).get(&self.name)
            }
        }
        .ok_or(SessionError::Tampered)?;

        Session::decode(cookie.value(), now)
    }

    /// Seals the session into a `Set-Cookie` response part.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if the session cannot be serialized.
    pub fn save(&self, session: &Session) -> Result<SessionCookie, SessionError> {
        self.save_at(session, Utc::now())
    }

    pub(crate) fn save_at(
        &self,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Result<SessionCookie, SessionError> {
        let payload = session.encode(now, self.max_age)?;

        let mut cookie = Cookie::build((self.name.clone(), payload))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(self.max_age.num_seconds()));
        if !self.domain.is_empty() {
            cookie = cookie.domain(self.domain.clone());
        }

        Ok(match self.sealing {
            Sealing::Encrypted => {
                SessionCookie::Encrypted(PrivateCookieJar::new(self.key.clone()).add(cookie))
            }
            Sealing::Signed => {
                SessionCookie::Signed(SignedCookieJar::new(self.key.clone()).add(cookie))
            }
        })
    }
}

/// A sealed session cookie, ready to be attached to a response.
pub enum SessionCookie {
    Encrypted(PrivateCookieJar),
    Signed(SignedCookieJar),
}

impl IntoResponseParts for SessionCookie {
    type Error = Infallible;

    fn into_response_parts(self, res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        match self {
            Self::Encrypted(jar) => jar.into_response_parts(res),
            Self::Signed(jar) => jar.into_response_parts(res),
        }
    }
}
