//! Verified caller identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A caller identity established either by an OIDC login or by a static
/// access token.
///
/// The gateway never inspects the contents; an identity is typically an
/// email address, but any non-empty string the identity provider vouches
/// for is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Identity(String);

impl Identity {
    /// Creates an identity, returning `None` for an empty or blank value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the identity, returning the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = EmptyIdentity;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(EmptyIdentity)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

/// Error returned when an empty or blank identity is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmptyIdentity;

impl fmt::Display for EmptyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("identity must not be empty")
    }
}

impl std::error::Error for EmptyIdentity {}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_identity_is_rejected() {
        assert!(Identity::new("").is_none());
        assert!(Identity::new("   ").is_none());
    }

    #[test]
    fn identity_keeps_value() {
        let id = Identity::new("alice@example.com").expect("non-empty");
        assert_eq!(id.as_str(), "alice@example.com");
        assert_eq!(id.to_string(), "alice@example.com");
    }

    #[test]
    fn identity_serializes_transparently() {
        let id = Identity::new("bob").expect("non-empty");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"bob\"");
    }

    #[test]
    fn blank_identity_does_not_deserialize() {
        assert!(serde_json::from_str::<Identity>("\"\"").is_err());
        assert!(serde_json::from_str::<Identity>("\"  \"").is_err());

        let id: Identity = serde_json::from_str("\"carol\"").expect("deserialize");
        assert_eq!(id.as_str(), "carol");
    }
}
