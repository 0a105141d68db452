//! Login challenge responses.
//!
//! Interactive browsers receive a script that navigates to the gateway's
//! `/launch` endpoint; upgrade (websocket) and XHR clients cannot follow a
//! script, so they only get the challenge status.

use url::form_urlencoded;

/// The value written to `Cache-Control` on every gateway-generated response.
pub const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// Default challenge status, a non-standard code browsers do not act on.
pub const DEFAULT_CHALLENGE_STATUS: u16 = 418;

/// How a challenged client is expected to behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// A browser navigation that can run a script redirect.
    Interactive,
    /// A protocol upgrade or XHR call; it gets an empty body.
    Programmatic,
}

impl ClientKind {
    /// Classifies a client from its `Upgrade` and `X-Requested-With` headers.
    ///
    /// Either header being present with a non-empty value marks the client
    /// as programmatic.
    #[must_use]
    pub fn classify(upgrade: Option<&str>, requested_with: Option<&str>) -> Self {
        let present = |v: Option<&str>| v.is_some_and(|v| !v.trim().is_empty());
        if present(upgrade) || present(requested_with) {
            Self::Programmatic
        } else {
            Self::Interactive
        }
    }
}

/// Builds the URL the browser should load to begin logging in.
///
/// The original destination is rebuilt from the requested host and URI and
/// forced to `https`.
#[must_use]
pub fn launch_url(self_host: &str, requested_host: &str, request_uri: &str) -> String {
    let original = format!("https://{requested_host}{request_uri}");
    let next: String = form_urlencoded::byte_serialize(original.as_bytes()).collect();
    format!("https://{self_host}/launch?next={next}")
}

/// Renders an HTML body that navigates the current tab to `target`.
///
/// The target is embedded as a JavaScript string literal with `<`, `>` and
/// `&` escaped, so it can never close the surrounding script element.
#[must_use]
pub fn script_redirect(target: &str) -> String {
    let literal = serde_json::to_string(target)
        .unwrap_or_else(|_| "\"/\"".to_string())
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026");
    format!(
        "<!DOCTYPE html>\n<script type=\"text/javascript\">\nwindow.location.replace({literal});\n</script>\n"
    )
}
