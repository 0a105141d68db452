//! The gateway's own login endpoints, `/launch` and `/oidc`.
//!
//! `/launch` records a pending login in the session cookie and sends the
//! browser to the identity provider with a script redirect, so the new
//! cookie is stored before the navigation happens. `/oidc` checks the
//! returned state, verifies the code and binds the identity.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header},
    response::{Html, IntoResponse, Response},
};
use portcullis_access::{VerificationError, generate_state, script_redirect};

use crate::app::AppState;
use crate::error::FlowError;
use crate::gateway::query_param;

/// Starts a login: records a fresh state and redirects to the provider.
pub fn launch(state: &AppState, headers: &HeaderMap, uri: &Uri) -> Result<Response, FlowError> {
    let next = query_param(uri, "next");
    let mut session = state.sessions.load_or_new(headers);

    let login_state = generate_state().map_err(|e| FlowError::Randomness {
        details: e.to_string(),
    })?;
    let request = state.identity_provider.authorization_request(&login_state);
    session.begin_login(next, &request);

    let cookie = state.sessions.save(&session).map_err(FlowError::SessionWrite)?;
    tracing::debug!(next = ?session.next(), "login launched");

    Ok((cookie, Html(script_redirect(&request.url))).into_response())
}

/// Completes a login from the provider's callback.
pub async fn callback(
    state: &AppState,
    headers: &HeaderMap,
    uri: &Uri,
) -> Result<Response, FlowError> {
    let mut session = state
        .sessions
        .load(headers)
        .map_err(FlowError::SessionUnavailable)?;

    let pending = session
        .pending_login(query_param(uri, "state").as_deref().unwrap_or_default())
        .map_err(FlowError::InvalidBrowserState)?;

    let code = query_param(uri, "code")
        .filter(|c| !c.is_empty())
        .ok_or(FlowError::Verification(VerificationError::MissingCode))?;

    let identity = state
        .identity_provider
        .verify(&code, &pending)
        .await
        .map_err(FlowError::Verification)?;

    tracing::info!(identity = %identity, "login completed");
    let next = session.complete_login(identity);
    let cookie = state.sessions.save(&session).map_err(FlowError::SessionWrite)?;

    let location = HeaderValue::try_from(next).unwrap_or_else(|_| HeaderValue::from_static("/"));
    Ok((StatusCode::FOUND, cookie, [(header::LOCATION, location)]).into_response())
}
