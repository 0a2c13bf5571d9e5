//! Conversation history endpoints

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Extension, Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::auth::CurrentUser;
use super::chat::resolve_conversation;
use super::{ApiError, AppState};
use crate::dialogue::Role;

/// Title shown for conversations that have none yet
const UNTITLED: &str = "New conversation";

#[derive(Default, Deserialize)]
struct ClearRequest {
    conversation_id: Option<i64>,
}

#[derive(Deserialize)]
struct LoadQuery {
    conversation_id: Option<String>,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct MessageView {
    role: Role,
    content: String,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct HistoryResponse {
    messages: Vec<MessageView>,
    conversation_id: Option<i64>,
}

#[derive(Serialize)]
struct ConversationView {
    id: i64,
    title: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ConversationList {
    conversations: Vec<ConversationView>,
}

#[derive(Serialize)]
struct CreatedResponse {
    conversation_id: i64,
    status: &'static str,
}

/// Clear one conversation, or delete all of them
///
/// The body is optional, so it is parsed by hand rather than through `Json`.
async fn clear_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    body: Bytes,
) -> Result<Json<StatusResponse>, ApiError> {
    let req: ClearRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ClearRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid request body: {e}")))?
    };

    if let Some(id) = req.conversation_id {
        if state.conversations.find_owned(id, user.id)?.is_none() {
            return Err(ApiError::conversation_denied());
        }
        let removed = state.conversations.clear_messages(id)?;
        tracing::info!(user_id = user.id, conversation_id = id, removed, "conversation cleared");
    } else {
        let removed = state.conversations.delete_all(user.id)?;
        tracing::info!(user_id = user.id, removed, "all conversations deleted");
    }

    Ok(Json(StatusResponse { status: "success" }))
}

async fn load_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<LoadQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let requested = match query.conversation_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<i64>()
                .map_err(|_| ApiError::bad_request("invalid conversation id"))?,
        ),
    };

    let conversation_id = match requested {
        Some(id) => Some(resolve_conversation(&state, user.id, Some(id))?),
        None => state.conversations.latest(user.id)?.map(|c| c.id),
    };

    let Some(conversation_id) = conversation_id else {
        return Ok(Json(HistoryResponse {
            messages: Vec::new(),
            conversation_id: None,
        }));
    };

    let messages = state
        .conversations
        .messages(conversation_id)?
        .into_iter()
        .map(|m| MessageView {
            role: m.role,
            content: m.content,
            created_at: m.created_at,
        })
        .collect();

    Ok(Json(HistoryResponse {
        messages,
        conversation_id: Some(conversation_id),
    }))
}

async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<ConversationList>, ApiError> {
    let conversations = state
        .conversations
        .list(user.id)?
        .into_iter()
        .map(|c| ConversationView {
            id: c.id,
            title: c.title.unwrap_or_else(|| UNTITLED.to_string()),
            created_at: c.created_at,
            updated_at: c.updated_at,
        })
        .collect();

    Ok(Json(ConversationList { conversations }))
}

async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<CreatedResponse>, ApiError> {
    let conversation_id = state.conversations.create(user.id)?;
    tracing::info!(user_id = user.id, conversation_id, "conversation created");

    Ok(Json(CreatedResponse {
        conversation_id,
        status: "success",
    }))
}

async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<Json<StatusResponse>, ApiError> {
    if state.conversations.find_owned(id, user.id)?.is_none() {
        return Err(ApiError::conversation_denied());
    }

    state.conversations.delete(id)?;
    tracing::info!(user_id = user.id, conversation_id = id, "conversation deleted");

    Ok(Json(StatusResponse { status: "success" }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/clear_history", post(clear_history))
        .route("/api/load_history", get(load_history))
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/api/conversations/{id}", delete(delete_conversation))
}
