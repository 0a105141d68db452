//! The ordered access-rule chain.
//!
//! Every request is classified by walking [`ACCESS_RULES`] in order; the
//! first rule that matches decides and later rules are never consulted.
//! The precedence is:
//!
//! 1. `upstream-error`: a non-empty `error` query parameter
//! 2. `health`: the configured health path, on any host
//! 3. `self-service`: the gateway's own host (login endpoints)
//! 4. `allow-list`: hosts reachable without authentication
//! 5. `identity`: a session user or a static token
//! 6. `challenge`: everything else

use portcullis_core::Identity;

use crate::catalog::same_host;

/// Facts about a request that the rules inspect.
///
/// [`RequestFacts::identity`] may be expensive (cookie decryption, token
/// lookup), so it is only called once the cheaper rules have passed.
pub trait RequestFacts {
    /// The request path, without query.
    fn path(&self) -> &str;

    /// The requested host, as sent by the client.
    fn host(&self) -> &str;

    /// The value of the `error` query parameter, if present.
    fn upstream_error(&self) -> Option<&str>;

    /// Whether the requested host is in the current allow-list snapshot.
    fn is_allow_listed(&self) -> bool;

    /// Resolves the caller's identity from the session or a static token.
    fn identity(&self) -> Option<Identity>;
}

/// Static gateway settings the rules compare against.
#[derive(Debug, Clone, Copy)]
pub struct Policy<'a> {
    /// The gateway's own host name.
    pub self_host: &'a str,
    /// The health check path.
    pub health_path: &'a str,
}

/// The action chosen for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Hand the request to the upstream error reporter.
    ReportUpstreamError,
    /// Answer the health check.
    Health,
    /// Serve the gateway's own login endpoints.
    SelfService,
    /// Forward without requiring an identity.
    AllowListed,
    /// Forward on behalf of a resolved identity.
    Authenticated(Identity),
    /// Ask the caller to log in.
    Challenge,
}

impl Decision {
    /// Returns true if the request should be forwarded to the backend.
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::AllowListed | Self::Authenticated(_))
    }
}

/// One predicate/action pair in the chain.
pub struct AccessRule {
    /// Stable name used in logs.
    pub name: &'static str,
    evaluate: fn(&Policy<'_>, &dyn RequestFacts) -> Option<Decision>,
}

impl AccessRule {
    /// Evaluates this rule, returning a decision if it matches.
    #[must_use]
    pub fn evaluate(&self, policy: &Policy<'_>, facts: &dyn RequestFacts) -> Option<Decision> {
        (self.evaluate)(policy, facts)
    }
}

impl std::fmt::Debug for AccessRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessRule").field("name", &self.name).finish()
    }
}

/// The rules in priority order.
pub const ACCESS_RULES: &[AccessRule] = &[
    AccessRule {
        name: "upstream-error",
        evaluate: |_, facts| {
            facts
                .upstream_error()
                .filter(|e| !e.is_empty())
                .map(|_| Decision::ReportUpstreamError)
        },
    },
    AccessRule {
        name: "health",
        evaluate: |policy, facts| (facts.path() == policy.health_path).then_some(Decision::Health),
    },
    AccessRule {
        name: "self-service",
        evaluate: |policy, facts| {
            same_host(facts.host(), policy.self_host).then_some(Decision::SelfService)
        },
    },
    AccessRule {
        name: "allow-list",
        evaluate: |_, facts| facts.is_allow_listed().then_some(Decision::AllowListed),
    },
    AccessRule {
        name: "identity",
        evaluate: |_, facts| facts.identity().map(Decision::Authenticated),
    },
    AccessRule {
        name: "challenge",
        evaluate: |_, _| Some(Decision::Challenge),
    },
];

/// The outcome of walking the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Name of the rule that fired.
    pub rule: &'static str,
    /// The chosen action.
    pub decision: Decision,
}

/// Classifies a request.
#[must_use]
pub fn decide(policy: &Policy<'_>, facts: &dyn RequestFacts) -> Verdict {
    ACCESS_RULES
        .iter()
        .find_map(|rule| {
            rule.evaluate(policy, facts).map(|decision| Verdict {
                rule: rule.name,
                decision,
            })
        })
        .unwrap_or(Verdict {
            rule: "challenge",
            decision: Decision::Challenge,
        })
}
