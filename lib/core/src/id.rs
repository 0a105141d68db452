//! Request identifiers.
//!
//! Request IDs use ULID format so that log lines sort by arrival time.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

const REQUEST_ID_PREFIX: &str = "req";

/// Identifier attached to every request the gateway handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Ulid);

impl RequestId {
    /// Creates a new ID with a randomly generated ULID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", REQUEST_ID_PREFIX, self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_display_format() {
        let id = RequestId::new().to_string();
        let ulid = id.strip_prefix("req_").expect("prefixed");
        assert_eq!(ulid.len(), 26);
    }

    #[test]
    fn ids_are_distinct() {
        assert_ne!(RequestId::new(), RequestId::new());
    }
}
