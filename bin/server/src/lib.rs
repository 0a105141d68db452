//! portcullis forward-auth gateway.
//!
//! Requests for the gateway's own host serve the OIDC login flow. Requests
//! for any other host are checked against the access rules and either
//! forwarded to their backend or answered with a login challenge.

pub mod app;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod gateway;
pub mod pages;
pub mod proxy;
