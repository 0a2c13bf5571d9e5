//! Speech synthesis proxy and generated audio

use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use super::auth::CurrentUser;
use super::{ApiError, AppState};
use crate::tts::service::audio_file_response;

#[derive(Deserialize)]
struct TtsRequest {
    #[serde(default)]
    text: String,
}

/// Synthesize with the caller's current voice, or the cloned default
async fn tts(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<TtsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let text = req.text.trim();
    if text.is_empty() {
        return Err(ApiError::bad_request("text is required"));
    }

    let spk_id = state.speakers.current_spk_id(user.id)?;
    tracing::debug!(
        user_id = user.id,
        spk_id = spk_id.as_deref().unwrap_or("clone"),
        chars = text.chars().count(),
        "forwarding synthesis request"
    );

    let body = state.speech.generate(text, spk_id.as_deref()).await?;
    Ok(Json(body))
}

async fn audio(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    audio_file_response(&state.audio_dir, &filename).await
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/tts", post(tts))
}

pub fn public_router() -> Router<Arc<AppState>> {
    Router::new().route("/audio/{filename}", get(audio))
}
