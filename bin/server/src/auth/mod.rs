//! Browser authentication for the gateway.
//!
//! This module provides:
//! - `SessionStore`: the signed/encrypted session cookie
//! - `OidcClient`: the OpenID Connect identity provider
//! - `routes`: the `/launch` and `/oidc` login endpoints
//!
//! Sessions live entirely in the browser cookie. The gateway keeps no
//! server-side session table, so any instance can serve any request.

pub mod cookie;
pub mod oidc;
pub mod routes;

pub use cookie::{SessionCookie, SessionStore};
pub use oidc::{OidcClient, OidcError};
