//! Registration, login and profile endpoints

use std::sync::Arc;

use axum::extract::{Extension, State};
use axum::http::{HeaderMap, StatusCode, header::SET_COOKIE};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};

use super::auth::{CurrentUser, session_user};
use super::{ApiError, AppState};
use crate::security::{SessionKeys, hash_password, verify_password};

#[derive(Deserialize)]
struct Credentials {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
struct ProfileUpdate {
    #[serde(default)]
    new_username: String,
    #[serde(default)]
    new_password: String,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct LoginResponse {
    status: &'static str,
    user_id: i64,
}

#[derive(Serialize)]
struct ProfileResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'static str>,
    username: String,
}

/// Hash off the async runtime; PBKDF2 at full rounds takes a while
async fn hash_blocking(password: String, rounds: u32) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || hash_password(&password, rounds))
        .await
        .map_err(|e| ApiError::internal(format!("password hashing failed: {e}")))
}

async fn register(
    State(state): State<Arc<AppState>>,
    Form(form): Form<Credentials>,
) -> Result<(StatusCode, Json<StatusResponse>), ApiError> {
    let username = form.username.trim();
    if username.is_empty() || form.password.is_empty() {
        return Err(ApiError::bad_request("username and password are required"));
    }

    if state.users.find_by_username(username)?.is_some() {
        return Err(ApiError::conflict("username already exists"));
    }

    let hash = hash_blocking(form.password, state.password_rounds).await?;
    let user = state.users.create(username, &hash)?;
    tracing::info!(user_id = user.id, username = %user.username, "user registered");

    Ok((StatusCode::CREATED, Json(StatusResponse { status: "success" })))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Form(form): Form<Credentials>,
) -> Result<impl IntoResponse, ApiError> {
    let invalid = || ApiError::unauthorized("invalid username or password");

    let Some(user) = state.users.find_by_username(form.username.trim())? else {
        tracing::debug!(username = %form.username, "login for unknown user");
        return Err(invalid());
    };

    let stored = user.password.clone();
    let password = form.password;
    let valid = tokio::task::spawn_blocking(move || verify_password(&stored, &password))
        .await
        .map_err(|e| ApiError::internal(format!("password check failed: {e}")))?;
    if !valid {
        tracing::debug!(user_id = user.id, "login with wrong password");
        return Err(invalid());
    }

    let token = state.sessions.issue(user.id)?;
    tracing::info!(user_id = user.id, "user logged in");

    Ok((
        [(SET_COOKIE, state.sessions.cookie(&token))],
        Json(LoginResponse {
            status: "success",
            user_id: user.id,
        }),
    ))
}

async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(user) = session_user(&state, &headers) {
        if let Some(recognizers) = &state.recognizers {
            recognizers.remove(&user.id.to_string()).await;
        }
        tracing::info!(user_id = user.id, "user logged out");
    }

    (
        [(SET_COOKIE, SessionKeys::clear_cookie())],
        Json(StatusResponse { status: "success" }),
    )
}

/// 401 that also drops the stale cookie
fn session_gone() -> Response {
    (
        [(SET_COOKIE, SessionKeys::clear_cookie())],
        ApiError::not_logged_in(),
    )
        .into_response()
}

async fn get_personal(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Response, ApiError> {
    let Some(record) = state.users.find(user.id)? else {
        tracing::warn!(user_id = user.id, "session for deleted user");
        return Ok(session_gone());
    };

    Ok(Json(ProfileResponse {
        status: None,
        username: record.username,
    })
    .into_response())
}

async fn update_personal(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Form(form): Form<ProfileUpdate>,
) -> Result<Response, ApiError> {
    let Some(record) = state.users.find(user.id)? else {
        return Ok(session_gone());
    };

    let mut username = record.username;
    let new_username = form.new_username.trim();
    if !new_username.is_empty() && new_username != username {
        state.users.update_username(user.id, new_username)?;
        tracing::info!(user_id = user.id, username = %new_username, "username changed");
        username = new_username.to_string();
    }

    if !form.new_password.is_empty() {
        let hash = hash_blocking(form.new_password, state.password_rounds).await?;
        state.users.update_password(user.id, &hash)?;
        tracing::info!(user_id = user.id, "password changed");
    }

    Ok(Json(ProfileResponse {
        status: Some("success"),
        username,
    })
    .into_response())
}

/// Routes open to anonymous callers
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", get(logout))
}

/// Routes behind the session middleware
pub fn personal_router() -> Router<Arc<AppState>> {
    Router::new().route("/personal", get(get_personal).post(update_personal))
}
