//! Chat endpoint backed by the dialogue model

use std::sync::Arc;

use axum::extract::{Extension, State};
use axum::{Json, Router, routing::post};
use serde::{Deserialize, Serialize};

use super::auth::CurrentUser;
use super::{ApiError, AppState};
use crate::dialogue::{ChatMessage, Role, build_messages, collect_reply, title_from};

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    query: String,
    conversation_id: Option<i64>,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    conversation_id: i64,
}

/// Resolve the conversation a request targets
///
/// An explicit id must belong to the caller. Without one the most recently
/// updated conversation is used, or a fresh one is created.
pub(super) fn resolve_conversation(
    state: &AppState,
    user_id: i64,
    requested: Option<i64>,
) -> Result<i64, ApiError> {
    if let Some(id) = requested {
        return match state.conversations.find_owned(id, user_id)? {
            Some(conversation) => Ok(conversation.id),
            None => Err(ApiError::conversation_denied()),
        };
    }

    match state.conversations.latest(user_id)? {
        Some(conversation) => Ok(conversation.id),
        None => Ok(state.conversations.create(user_id)?),
    }
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let query = req.query.trim();
    if query.is_empty() {
        return Err(ApiError::bad_request("no query provided"));
    }

    let conversation_id = resolve_conversation(&state, user.id, req.conversation_id)?;

    let history: Vec<ChatMessage> = state
        .conversations
        .messages(conversation_id)?
        .iter()
        .map(crate::db::StoredMessage::to_chat)
        .collect();
    state
        .conversations
        .add_message(conversation_id, Role::User, query)?;

    let messages = build_messages(&state.system_prompt, &history, query);
    tracing::debug!(
        user_id = user.id,
        conversation_id,
        history = history.len(),
        "sending chat request"
    );
    let reply = collect_reply(state.chat.as_ref(), &messages).await?;

    if reply.is_empty() {
        tracing::warn!(conversation_id, "model returned an empty reply");
    } else {
        state
            .conversations
            .add_message(conversation_id, Role::Assistant, &reply)?;

        if state.conversations.title(conversation_id)?.is_none()
            && let Some(first) = state.conversations.first_user_message(conversation_id)?
        {
            state
                .conversations
                .set_title(conversation_id, &title_from(&first))?;
        }
        state.conversations.touch(conversation_id)?;
    }

    Ok(Json(ChatResponse {
        response: reply,
        conversation_id,
    }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/chat", post(chat))
}
