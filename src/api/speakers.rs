//! Per-user cloned voices

use std::sync::Arc;

use axum::extract::{Extension, Multipart, Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::auth::CurrentUser;
use super::{ApiError, AppState};
use crate::db::{MAX_SPEAKERS_PER_USER, Speaker};

#[derive(Serialize)]
struct SpeakerView {
    id: i64,
    name: String,
    spk_id: String,
    is_active: bool,
    is_current: bool,
    created_at: DateTime<Utc>,
}

impl From<Speaker> for SpeakerView {
    fn from(s: Speaker) -> Self {
        Self {
            id: s.id,
            name: s.name,
            spk_id: s.spk_id,
            is_active: s.is_active,
            is_current: s.is_current,
            created_at: s.created_at,
        }
    }
}

#[derive(Serialize)]
struct SpeakerList {
    speakers: Vec<SpeakerView>,
}

#[derive(Serialize)]
struct SpeakerSummary {
    id: i64,
    name: String,
    spk_id: String,
}

#[derive(Serialize)]
struct SpeakerCreated {
    status: &'static str,
    speaker: SpeakerSummary,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

fn speaker_denied() -> ApiError {
    ApiError::forbidden("speaker not found or access denied")
}

/// Speaker id scoped to a user: `user_<uid>_spk_<8 hex>`
#[must_use]
pub fn user_speaker_id(user_id: i64) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("user_{user_id}_spk_{}", &hex[..8])
}

async fn list_speakers(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<SpeakerList>, ApiError> {
    let speakers = state
        .speakers
        .list(user.id)?
        .into_iter()
        .map(SpeakerView::from)
        .collect();
    Ok(Json(SpeakerList { speakers }))
}

async fn add_speaker(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<Json<SpeakerCreated>, ApiError> {
    let existing = state.speakers.count(user.id)?;
    if existing >= MAX_SPEAKERS_PER_USER {
        return Err(ApiError::bad_request(format!(
            "at most {MAX_SPEAKERS_PER_USER} voices per user"
        )));
    }

    let mut audio = None;
    let mut filename = String::new();
    let mut name = String::new();
    let mut prompt_text = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        match field.name() {
            Some("audio") => {
                filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                audio = Some(bytes);
            }
            Some("name") => {
                name = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
            }
            Some("prompt_text") => {
                prompt_text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
            }
            _ => {}
        }
    }

    let Some(audio) = audio.filter(|a| !a.is_empty()) else {
        return Err(ApiError::bad_request("no audio file provided"));
    };
    if filename.trim().is_empty() {
        return Err(ApiError::bad_request("no file selected"));
    }
    let name = name.trim();
    let prompt_text = prompt_text.trim();
    if name.is_empty() || prompt_text.is_empty() {
        return Err(ApiError::bad_request("name and prompt_text are required"));
    }

    let requested = user_speaker_id(user.id);
    let spk_id = state
        .speech
        .add_speaker(audio.to_vec(), &filename, prompt_text, &requested)
        .await?;
    if spk_id != requested {
        tracing::debug!(
            requested = %requested,
            spk_id = %spk_id,
            "TTS service chose a different id"
        );
    }

    let first = existing == 0;
    let id = state
        .speakers
        .create(user.id, name, &spk_id, prompt_text, first)?;
    if first {
        state.speakers.set_current(user.id, id)?;
    }

    Ok(Json(SpeakerCreated {
        status: "success",
        speaker: SpeakerSummary {
            id,
            name: name.to_string(),
            spk_id,
        },
    }))
}

async fn switch_speaker(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(speaker_id): Path<i64>,
) -> Result<Json<StatusResponse>, ApiError> {
    if state.speakers.find_owned(speaker_id, user.id)?.is_none() {
        return Err(speaker_denied());
    }

    state.speakers.set_current(user.id, speaker_id)?;
    Ok(Json(StatusResponse { status: "success" }))
}

async fn delete_speaker(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(speaker_id): Path<i64>,
) -> Result<Json<StatusResponse>, ApiError> {
    let Some(speaker) = state.speakers.delete(user.id, speaker_id)? else {
        return Err(speaker_denied());
    };

    // Best effort, the row is already gone
    if let Err(e) = state.speech.delete_speaker(&speaker.spk_id).await {
        tracing::warn!(
            spk_id = %speaker.spk_id,
            error = %e,
            "failed to remove voice from TTS service"
        );
    }

    Ok(Json(StatusResponse { status: "success" }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/speakers", get(list_speakers).post(add_speaker))
        .route("/api/speakers/{id}/switch", post(switch_speaker))
        .route("/api/speakers/{id}", delete(delete_speaker))
}
