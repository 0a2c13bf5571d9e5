//! Session cookie authentication middleware

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use super::{ApiError, AppState};
use crate::security::session_token_from_headers;

/// The logged-in caller, inserted by [`require_session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i64,
}

/// Resolve the session cookie to a user id, if any
#[must_use]
pub fn session_user(state: &AppState, headers: &HeaderMap) -> Option<CurrentUser> {
    let token = session_token_from_headers(headers)?;
    state.sessions.verify(&token).map(|id| CurrentUser { id })
}

/// Middleware rejecting requests without a valid session
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(user) = session_user(&state, req.headers()) else {
        tracing::debug!(path = %req.uri().path(), "no valid session");
        return Err(ApiError::not_logged_in());
    };

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
