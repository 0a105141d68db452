//! Core types shared by the portcullis gateway crates.
//!
//! This crate provides the verified-identity newtype and the per-request
//! identifier used to correlate gateway log lines.

pub mod id;
pub mod identity;

pub use id::RequestId;
pub use identity::{EmptyIdentity, Identity};
