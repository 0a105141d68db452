//! Access decisions for the portcullis forward-auth gateway.
//!
//! This crate provides the network-free core of the gateway:
//! - The ordered access-rule chain (`ACCESS_RULES`, `decide`)
//! - Browser login sessions (`Session`) and their state transitions
//! - Login challenge construction (`ClientKind`, `launch_url`, `script_redirect`)
//! - The catalog snapshot of allow-listed hosts, routes and static tokens
//! - The `IdentityProvider` seam and OIDC configuration
//!
//! # Example
//!
//! ```
//! use portcullis_access::{Catalog, Decision, Policy, RequestFacts, decide};
//! use portcullis_core::Identity;
//!
//! struct Probe<'a> {
//!     catalog: &'a Catalog,
//!     host: &'a str,
//! }
//!
//! impl RequestFacts for Probe<'_> {
//!     fn path(&self) -> &str { "/" }
//!     fn host(&self) -> &str { self.host }
//!     fn upstream_error(&self) -> Option<&str> { None }
//!     fn is_allow_listed(&self) -> bool { self.catalog.is_allow_listed(self.host) }
//!     fn identity(&self) -> Option<Identity> { None }
//! }
//!
//! let catalog = Catalog::new().with_allowed_host("status.example.com");
//! let policy = Policy { self_host: "gate.example.com", health_path: "/healthz/ping" };
//!
//! let open = Probe { catalog: &catalog, host: "status.example.com" };
//! assert_eq!(decide(&policy, &open).decision, Decision::AllowListed);
//!
//! let closed = Probe { catalog: &catalog, host: "app.example.com" };
//! assert_eq!(decide(&policy, &closed).decision, Decision::Challenge);
//! ```

pub mod auth;
pub mod catalog;
pub mod challenge;
pub mod error;
pub mod oidc;
pub mod rules;
pub mod session;

pub use auth::{AuthorizationRequest, IdentityProvider, PendingLogin, generate_state};
pub use catalog::{Catalog, normalize_host, same_host};
pub use challenge::{ClientKind, DEFAULT_CHALLENGE_STATUS, NO_CACHE, launch_url, script_redirect};
pub use error::{CatalogError, LoginStateError, SessionError, VerificationError};
pub use oidc::{IdentityClaim, OidcConfig};
pub use rules::{ACCESS_RULES, AccessRule, Decision, Policy, RequestFacts, Verdict, decide};
pub use session::Session;
