//! Streaming speech recognition endpoint

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::{Json, Router, routing::post};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;

use super::auth::session_user;
use super::{ApiError, AppState};
use crate::stt::{ANONYMOUS, Recognition, RecognitionStatus};

#[derive(Deserialize)]
struct RecognizeRequest {
    audio: Option<String>,

    /// The client stopped recording; flush what is buffered
    #[serde(default, rename = "final")]
    is_final: bool,
}

async fn recognize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RecognizeRequest>,
) -> Result<Json<Recognition>, ApiError> {
    let Some(audio) = req.audio.filter(|a| !a.is_empty()) else {
        return Err(ApiError::bad_request("no audio data"));
    };
    let pcm = BASE64
        .decode(audio.as_bytes())
        .map_err(|e| ApiError::bad_request(format!("invalid audio encoding: {e}")))?;

    let Some(recognizers) = &state.recognizers else {
        return Err(ApiError::internal("speech recognition is not configured"));
    };

    let key = session_user(&state, &headers)
        .map_or_else(|| ANONYMOUS.to_string(), |u| u.id.to_string());
    let slot = recognizers.session(&key).await;
    let mut session = slot.lock().await;

    let mut result = session.accept(&pcm).await?;
    if req.is_final && result.status != RecognitionStatus::Complete {
        result = session.finish().await?;
    }

    tracing::debug!(
        key = %key,
        status = ?result.status,
        chars = result.text.len(),
        "recognition step"
    );
    Ok(Json(result))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/recognize", post(recognize))
}
