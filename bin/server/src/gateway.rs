//! Per-request dispatch.
//!
//! Every request lands in [`dispatch`], which walks the access rules and
//! turns the chosen [`Decision`] into a response: the health reply, the
//! login endpoints, a forwarded request or a login challenge.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, Uri, header},
    response::{Html, IntoResponse, Response},
};
use portcullis_access::{
    Catalog, ClientKind, Decision, Policy, RequestFacts, decide, launch_url, script_redirect,
};
use portcullis_core::Identity;
use std::sync::Arc;

use crate::app::AppState;
use crate::auth::routes;
use crate::pages;
use crate::proxy::Grant;

const X_REQUESTED_WITH: &str = "x-requested-with";

/// What the access rules see of one request.
struct GatewayRequest<'a> {
    state: &'a AppState,
    catalog: &'a Catalog,
    headers: &'a HeaderMap,
    path: &'a str,
    host: &'a str,
    error: Option<&'a str>,
}

impl RequestFacts for GatewayRequest<'_> {
    fn path(&self) -> &str {
        self.path
    }

    fn host(&self) -> &str {
        self.host
    }

    fn upstream_error(&self) -> Option<&str> {
        self.error
    }

    fn is_allow_listed(&self) -> bool {
        self.catalog.is_allow_listed(self.host)
    }

    fn identity(&self) -> Option<Identity> {
        let from_session = self
            .state
            .sessions
            .load(self.headers)
            .ok()
            .and_then(|session| session.user().cloned());

        from_session.or_else(|| {
            self.headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|authorization| self.catalog.authenticate(authorization))
        })
    }
}

/// Returns the host the client asked for, from `Host` or the URI authority.
pub fn request_host<B>(request: &axum::http::Request<B>) -> String {
    request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
        .unwrap_or_default()
}

/// Returns the first value of `name` in the request query.
///
/// A repeated key keeps its first value and the rest are ignored.
pub(crate) fn query_param(uri: &Uri, name: &str) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Handles every request the gateway receives.
pub async fn dispatch(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let catalog = state.catalog.snapshot();
    let host = request_host(&request);
    let error = query_param(request.uri(), "error");

    let verdict = {
        let facts = GatewayRequest {
            state: &state,
            catalog: &catalog,
            headers: request.headers(),
            path: request.uri().path(),
            host: &host,
            error: error.as_deref(),
        };
        let policy = Policy {
            self_host: &state.config.host,
            health_path: &state.config.health.path,
        };
        decide(&policy, &facts)
    };

    tracing::debug!(
        rule = verdict.rule,
        host = %host,
        path = %request.uri().path(),
        "access decision"
    );

    match verdict.decision {
        Decision::ReportUpstreamError => pages::upstream_error(
            error.as_deref().unwrap_or_default(),
            query_param(request.uri(), "error_description").as_deref(),
        ),
        Decision::Health => (StatusCode::OK, state.config.health.reply.clone()).into_response(),
        Decision::SelfService => self_service(&state, request.headers(), request.uri()).await,
        Decision::AllowListed => state.upstream.forward(request, Grant::AllowListed).await,
        Decision::Authenticated(identity) => {
            state
                .upstream
                .forward(request, Grant::Authenticated(identity))
                .await
        }
        Decision::Challenge => challenge(&state, request.headers(), request.uri(), &host),
    }
}

async fn self_service(state: &AppState, headers: &HeaderMap, uri: &Uri) -> Response {
    let result = match uri.path() {
        "/launch" => routes::launch(state, headers, uri),
        "/oidc" => routes::callback(state, headers, uri).await,
        _ => {
            return pages::error_page(StatusCode::NOT_FOUND, "Not found", "no such page");
        }
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

/// Builds the "log in first" response.
fn challenge(state: &AppState, headers: &HeaderMap, uri: &Uri, host: &str) -> Response {
    let status =
        StatusCode::from_u16(state.config.challenge.status).unwrap_or(StatusCode::IM_A_TEAPOT);
    let upgrade = headers.get(header::UPGRADE).and_then(|v| v.to_str().ok());
    let requested_with = headers.get(X_REQUESTED_WITH).and_then(|v| v.to_str().ok());

    match ClientKind::classify(upgrade, requested_with) {
        ClientKind::Programmatic => status.into_response(),
        ClientKind::Interactive => {
            let request_uri = uri.path_and_query().map_or("/", |p| p.as_str());
            let target = launch_url(&state.config.host, host, request_uri);
            (status, Html(script_redirect(&target))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::router;
    use crate::auth::SessionStore;
    use crate::catalog::CatalogHandle;
    use crate::config::GatewayConfig;
    use crate::proxy::Upstream;
    use async_trait::async_trait;
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::{self, HeaderValue};
    use portcullis_access::{
        AuthorizationRequest, IdentityProvider, NO_CACHE, PendingLogin, Session,
        VerificationError,
    };
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    const GATE: &str = "gate.example.com";
    const APP: &str = "app.example.com";

    /// Accepts exactly one authorization code.
    struct FakeProvider {
        issued: AtomicUsize,
        accepted_code: &'static str,
        verified: Mutex<Vec<(String, PendingLogin)>>,
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        fn authorization_request(&self, state: &str) -> AuthorizationRequest {
            let n = self.issued.fetch_add(1, Ordering::SeqCst);
            AuthorizationRequest {
                url: format!("https://idp.example.com/authorize?state={state}"),
                state: state.to_string(),
                nonce: format!("nonce-{n}"),
                pkce_verifier: format!("verifier-{n}"),
            }
        }

        async fn verify(
            &self,
            code: &str,
            pending: &PendingLogin,
        ) -> Result<Identity, VerificationError> {
            self.verified
                .lock()
                .expect("lock")
                .push((code.to_string(), pending.clone()));
            if code == self.accepted_code {
                Ok(Identity::new("alice@example.com").expect("identity"))
            } else {
                Err(VerificationError::Exchange {
                    reason: "invalid_grant".to_string(),
                })
            }
        }
    }

    /// Records forwarded requests and answers 200.
    #[derive(Default)]
    struct RecordingUpstream {
        forwarded: Mutex<Vec<(String, String, Grant)>>,
    }

    #[async_trait]
    impl Upstream for RecordingUpstream {
        async fn forward(&self, request: Request, grant: Grant) -> Response {
            let path = request.uri().path().to_string();
            self.forwarded
                .lock()
                .expect("lock")
                .push((request_host(&request), path.clone(), grant));

            if path == "/static" {
                ([(header::CACHE_CONTROL, "public, max-age=60")], "backend").into_response()
            } else {
                "backend".into_response()
            }
        }
    }

    struct Harness {
        app: Router,
        sessions: SessionStore,
        provider: Arc<FakeProvider>,
        upstream: Arc<RecordingUpstream>,
    }

    fn config() -> GatewayConfig {
        let vars = [
            ("PORTCULLIS__HOST", GATE),
            ("PORTCULLIS__COOKIE__DOMAIN", "example.com"),
            ("PORTCULLIS__COOKIE__KEY1", "0123456789abcdef0123456789abcdef"),
            ("PORTCULLIS__COOKIE__KEY2", "fedcba9876543210fedcba9876543210"),
            ("PORTCULLIS__OIDC__ISSUER_URL", "https://idp.example.com"),
            ("PORTCULLIS__OIDC__CLIENT_ID", "portcullis"),
            ("PORTCULLIS__OIDC__CLIENT_SECRET", "hunter2"),
            ("PORTCULLIS__OIDC__REDIRECT_URI", "https://gate.example.com/oidc"),
        ];
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayConfig::from_environment(
            config::Environment::with_prefix(crate::config::ENV_PREFIX).source(Some(map)),
        )
        .expect("config")
    }

    fn harness() -> Harness {
        let config = config();
        let sessions = SessionStore::new(&config.cookie).expect("session store");
        let provider = Arc::new(FakeProvider {
            issued: AtomicUsize::new(0),
            accepted_code: "good-code",
            verified: Mutex::new(Vec::new()),
        });
        let upstream = Arc::new(RecordingUpstream::default());
        let catalog = Catalog::new()
            .with_allowed_host("status.example.com")
            .with_token("s3cret", Identity::new("ci-bot").expect("identity"));

        let state = Arc::new(AppState {
            config,
            sessions: sessions.clone(),
            identity_provider: provider.clone(),
            catalog: CatalogHandle::new(catalog),
            upstream: upstream.clone(),
        });

        Harness {
            app: router(state),
            sessions,
            provider,
            upstream,
        }
    }

    fn get(host: &str, uri: &str) -> http::request::Builder {
        http::Request::builder().uri(uri).header(header::HOST, host)
    }

    async fn send(app: &Router, request: http::request::Builder) -> Response {
        app.clone()
            .oneshot(request.body(Body::empty()).expect("request"))
            .await
            .expect("infallible")
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf-8 body")
    }

    /// Turns a `Set-Cookie` response header into a `Cookie` request value.
    fn cookie_from(response: &Response) -> Option<String> {
        response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::to_string)
    }

    fn session_of(harness: &Harness, cookie: &str) -> Session {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).expect("cookie"));
        harness.sessions.load(&headers).expect("session")
    }

    /// Runs `/launch` and returns the cookie and the issued state.
    async fn launch(harness: &Harness, next: &str) -> (String, String) {
        let next: String = url::form_urlencoded::byte_serialize(next.as_bytes()).collect();
        let uri = format!("/launch?next={next}");
        let response = send(&harness.app, get(GATE, &uri)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = cookie_from(&response).expect("launch sets a cookie");
        let state = session_of(harness, &cookie)
            .state()
            .expect("pending state")
            .to_string();
        (cookie, state)
    }

    async fn login(harness: &Harness) -> String {
        let (cookie, state) = launch(harness, "https://app.example.com/").await;
        let response = send(
            &harness.app,
            get(GATE, &format!("/oidc?code=good-code&state={state}"))
                .header(header::COOKIE, cookie),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        cookie_from(&response).expect("callback sets a cookie")
    }

    #[tokio::test]
    async fn health_answers_on_any_host_without_auth() {
        let harness = harness();
        for host in [GATE, APP, "unknown.example.net"] {
            let response = send(
                &harness.app,
                get(host, "/healthz/ping").header(header::COOKIE, "portcullis=garbage"),
            )
            .await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[header::CACHE_CONTROL], NO_CACHE);
            assert_eq!(body_text(response).await, "ok");
        }
        assert!(harness.upstream.forwarded.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn error_parameter_renders_error_page_first() {
        let harness = harness();
        let response = send(
            &harness.app,
            get(APP, "/healthz/ping?error=access_denied&error_description=%3Cb%3Enope%3C%2Fb%3E"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_text(response).await;
        assert!(body.contains("access_denied"));
        assert!(body.contains("&lt;b&gt;nope&lt;/b&gt;"));
    }

    #[tokio::test]
    async fn repeated_error_parameter_uses_first_value() {
        let harness = harness();
        let response = send(&harness.app, get(APP, "/dash?error=first&error=second")).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_text(response).await;
        assert!(body.contains("first"));
        assert!(!body.contains("second"));
        assert!(harness.upstream.forwarded.lock().expect("lock").is_empty());
    }

    #[test]
    fn query_param_takes_first_occurrence() {
        let uri: Uri = "/launch?next=a%2Fb&next=c&empty=".parse().expect("uri");
        assert_eq!(query_param(&uri, "next").as_deref(), Some("a/b"));
        assert_eq!(query_param(&uri, "empty").as_deref(), Some(""));
        assert_eq!(query_param(&uri, "missing"), None);

        let bare: Uri = "/launch".parse().expect("uri");
        assert_eq!(query_param(&bare, "next"), None);
    }

    #[tokio::test]
    async fn repeated_next_keeps_first_value() {
        let harness = harness();
        let response = send(
            &harness.app,
            get(GATE, "/launch?next=https%3A%2F%2Fapp.example.com%2Fone&next=https%3A%2F%2Fevil.example%2F"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let cookie = cookie_from(&response).expect("launch sets a cookie");
        assert_eq!(
            session_of(&harness, &cookie).next(),
            Some("https://app.example.com/one")
        );
    }

    #[tokio::test]
    async fn launch_records_state_and_script_redirects() {
        let harness = harness();
        let response = send(
            &harness.app,
            get(GATE, "/launch?next=https%3A%2F%2Fapp.example.com%2Fdash%3Fx%3D1"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], NO_CACHE);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .expect("content type")
                .starts_with("text/html")
        );

        let cookie = cookie_from(&response).expect("cookie");
        let session = session_of(&harness, &cookie);
        let state = session.state().expect("state");
        assert_eq!(state.len(), 64);
        assert_eq!(session.next(), Some("https://app.example.com/dash?x=1"));

        let body = body_text(response).await;
        assert!(body.contains(&format!("https://idp.example.com/authorize?state={state}")));
        assert!(body.contains("window.location.replace"));
    }

    #[tokio::test]
    async fn consecutive_launches_issue_distinct_states() {
        let harness = harness();
        let (_, first) = launch(&harness, "/").await;
        let (_, second) = launch(&harness, "/").await;
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn callback_with_mismatched_state_is_forbidden() {
        let harness = harness();
        let (cookie, _) = launch(&harness, "/").await;

        for code in ["good-code", "other", ""] {
            let response = send(
                &harness.app,
                get(GATE, &format!("/oidc?code={code}&state=forged"))
                    .header(header::COOKIE, cookie.clone()),
            )
            .await;
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
            assert!(cookie_from(&response).is_none());
            assert!(body_text(response).await.contains("invalid browser state"));
        }
        assert!(harness.provider.verified.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn callback_without_session_is_bad_request() {
        let harness = harness();
        let response = send(&harness.app, get(GATE, "/oidc?code=good-code&state=abc")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn failed_verification_leaves_session_untouched() {
        let harness = harness();
        let (cookie, state) = launch(&harness, "/").await;

        for _ in 0..2 {
            let response = send(
                &harness.app,
                get(GATE, &format!("/oidc?code=bad-code&state={state}"))
                    .header(header::COOKIE, cookie.clone()),
            )
            .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert!(cookie_from(&response).is_none());
            assert!(body_text(response).await.contains("invalid_grant"));
        }

        let session = session_of(&harness, &cookie);
        assert!(!session.is_authenticated());
        assert_eq!(session.state(), Some(state.as_str()));
    }

    #[tokio::test]
    async fn successful_callback_redirects_to_captured_next() {
        let harness = harness();
        let next = "https://app.example.com/reports?month=3&year=2024";
        let (cookie, state) = launch(&harness, next).await;

        let response = send(
            &harness.app,
            get(GATE, &format!("/oidc?code=good-code&state={state}"))
                .header(header::COOKIE, cookie.clone()),
        )
        .await;

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], next);

        let verified = harness.provider.verified.lock().expect("lock").clone();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].1.nonce, "nonce-0");

        let updated = cookie_from(&response).expect("cookie");
        let session = session_of(&harness, &updated);
        assert_eq!(session.user().map(Identity::as_str), Some("alice@example.com"));
        assert_eq!(session.state(), None);
        assert_eq!(session.next(), None);

        // the state is single-use
        let replay = send(
            &harness.app,
            get(GATE, &format!("/oidc?code=good-code&state={state}"))
                .header(header::COOKIE, updated),
        )
        .await;
        assert_eq!(replay.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn empty_next_redirects_to_root() {
        let harness = harness();
        let (cookie, state) = launch(&harness, "").await;
        let response = send(
            &harness.app,
            get(GATE, &format!("/oidc?code=good-code&state={state}")).header(header::COOKIE, cookie),
        )
        .await;
        assert_eq!(response.headers()[header::LOCATION], "/");
    }

    #[tokio::test]
    async fn unknown_gateway_path_is_not_found() {
        let harness = harness();
        let response = send(&harness.app, get(GATE, "/admin")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(harness.upstream.forwarded.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn browser_challenge_script_redirects_to_launch() {
        let harness = harness();
        let response = send(&harness.app, get(APP, "/dash?x=1")).await;

        assert_eq!(response.status().as_u16(), 418);
        assert_eq!(response.headers()[header::CACHE_CONTROL], NO_CACHE);
        let body = body_text(response).await;
        assert!(body.contains(
            "https://gate.example.com/launch?next=https%3A%2F%2Fapp.example.com%2Fdash%3Fx%3D1"
        ));
        assert!(harness.upstream.forwarded.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn programmatic_challenge_has_empty_body() {
        let harness = harness();
        for (name, value) in [("upgrade", "websocket"), ("x-requested-with", "XMLHttpRequest")] {
            let response = send(&harness.app, get(APP, "/api").header(name, value)).await;
            assert_eq!(response.status().as_u16(), 418);
            assert!(body_text(response).await.is_empty());
        }
    }

    #[tokio::test]
    async fn tampered_cookie_is_challenged() {
        let harness = harness();
        let cookie = login(&harness).await;
        let (name, value) = cookie.split_once('=').expect("name=value");
        let tampered = format!("{name}={}", &value[..value.len() - 2]);

        let response = send(&harness.app, get(APP, "/").header(header::COOKIE, tampered)).await;
        assert_eq!(response.status().as_u16(), 418);
    }

    #[tokio::test]
    async fn authenticated_requests_pass_through_repeatedly() {
        let harness = harness();
        let cookie = login(&harness).await;

        for _ in 0..3 {
            let response =
                send(&harness.app, get(APP, "/dash").header(header::COOKIE, cookie.clone())).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert!(cookie_from(&response).is_none());
        }

        let forwarded = harness.upstream.forwarded.lock().expect("lock").clone();
        assert_eq!(forwarded.len(), 3);
        let alice = Identity::new("alice@example.com").expect("identity");
        assert!(
            forwarded
                .iter()
                .all(|(host, _, grant)| host == APP && *grant == Grant::Authenticated(alice.clone()))
        );
    }

    #[tokio::test]
    async fn static_token_passes_through() {
        let harness = harness();
        let response = send(
            &harness.app,
            get(APP, "/api").header(header::AUTHORIZATION, "Bearer s3cret"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let forwarded = harness.upstream.forwarded.lock().expect("lock").clone();
        assert_eq!(
            forwarded[0].2,
            Grant::Authenticated(Identity::new("ci-bot").expect("identity"))
        );
    }

    #[tokio::test]
    async fn allow_listed_host_needs_no_identity() {
        let harness = harness();
        let response = send(&harness.app, get("Status.Example.com", "/")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let forwarded = harness.upstream.forwarded.lock().expect("lock").clone();
        assert_eq!(forwarded[0].2, Grant::AllowListed);
    }

    #[tokio::test]
    async fn backend_cache_control_is_overridden() {
        let harness = harness();
        let cookie = login(&harness).await;

        let authenticated = send(
            &harness.app,
            get(APP, "/static").header(header::COOKIE, cookie),
        )
        .await;
        assert_eq!(authenticated.status(), StatusCode::OK);
        assert_eq!(authenticated.headers()[header::CACHE_CONTROL], NO_CACHE);

        let allow_listed = send(&harness.app, get("status.example.com", "/static")).await;
        assert_eq!(allow_listed.headers()[header::CACHE_CONTROL], NO_CACHE);
        assert_eq!(
            allow_listed
                .headers()
                .get_all(header::CACHE_CONTROL)
                .iter()
                .count(),
            1
        );
    }
}
