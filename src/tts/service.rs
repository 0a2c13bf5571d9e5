//! Standalone TTS service
//!
//! Hosts the [`SynthesisEngine`] behind HTTP so the main app does not load the
//! voice model. The engine is built on first use.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::OnceCell;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::audio::{REFERENCE_SAMPLE_RATE, is_safe_filename, load_reference, to_wav_bytes};
use super::engine::SynthesisEngine;
use super::model::{ReferenceVoice, VoiceModel};
use super::speakers::SpeakerRegistry;
use crate::api::ApiError;
use crate::config::TtsConfig;
use crate::{Error, Result};

/// Largest accepted upload (reference clips)
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// What the engine is built from
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub reference_audio: Option<PathBuf>,
    pub reference_prompt_text: String,
    pub speakers_file: PathBuf,
    pub max_workers: Option<usize>,
    pub audio_dir: PathBuf,

    /// Base of the `audio_url` handed back to callers
    pub public_url: String,
}

impl EngineSettings {
    #[must_use]
    pub fn from_config(tts: &TtsConfig, audio_dir: &Path) -> Self {
        Self {
            reference_audio: tts.reference_audio.clone(),
            reference_prompt_text: tts.reference_prompt_text.clone(),
            speakers_file: tts.speakers_file.clone(),
            max_workers: tts.max_workers,
            audio_dir: audio_dir.to_path_buf(),
            public_url: tts.public_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Shared state of the TTS service
pub struct TtsServiceState {
    model: Arc<dyn VoiceModel>,
    settings: EngineSettings,
    engine: OnceCell<Arc<SynthesisEngine>>,
}

impl TtsServiceState {
    pub fn new(model: Arc<dyn VoiceModel>, settings: EngineSettings) -> Self {
        Self {
            model,
            settings,
            engine: OnceCell::new(),
        }
    }

    /// Whether the engine has been built
    #[must_use]
    pub fn initialized(&self) -> bool {
        self.engine.initialized()
    }

    /// The engine, building it on first call
    ///
    /// Concurrent first callers share one initialization; a failed one is
    /// retried by the next caller.
    ///
    /// # Errors
    ///
    /// Returns error if the reference clip or speaker registry cannot be loaded
    pub async fn engine(&self) -> Result<Arc<SynthesisEngine>> {
        self.engine
            .get_or_try_init(|| self.build_engine())
            .await
            .cloned()
    }

    async fn build_engine(&self) -> Result<Arc<SynthesisEngine>> {
        tracing::info!("initializing synthesis engine");

        let reference = match &self.settings.reference_audio {
            Some(path) if path.exists() => {
                let bytes = tokio::fs::read(path).await?;
                let samples = load_reference(&bytes, REFERENCE_SAMPLE_RATE)?;
                tracing::info!(path = %path.display(), samples = samples.len(), "reference voice loaded");
                Some(ReferenceVoice::new(
                    samples,
                    self.settings.reference_prompt_text.clone(),
                ))
            }
            Some(path) => {
                tracing::warn!(path = %path.display(), "reference audio not found, clone mode disabled");
                None
            }
            None => None,
        };

        let speakers = SpeakerRegistry::load(&self.settings.speakers_file)?;
        let engine = SynthesisEngine::new(
            Arc::clone(&self.model),
            reference,
            speakers,
            self.settings.audio_dir.clone(),
        )
        .with_max_workers(self.settings.max_workers);

        tracing::info!(sample_rate = engine.sample_rate(), "synthesis engine ready");
        Ok(Arc::new(engine))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    tts_initialized: bool,
}

async fn health(State(state): State<Arc<TtsServiceState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        tts_initialized: state.initialized(),
    })
}

const fn default_use_clone() -> bool {
    true
}

#[derive(Deserialize)]
struct GenerateRequest {
    #[serde(default)]
    text: String,
    spk_id: Option<String>,
    #[serde(default = "default_use_clone")]
    use_clone: bool,
}

#[derive(Serialize)]
struct GenerateResponse {
    status: &'static str,
    audio_url: String,
    audio: String,
    format: &'static str,
    sample_rate: u32,
    filename: String,
}

async fn generate(
    State(state): State<Arc<TtsServiceState>>,
    Json(req): Json<GenerateRequest>,
) -> std::result::Result<Json<GenerateResponse>, ApiError> {
    let text = req.text.trim();
    if text.is_empty() {
        return Err(ApiError::bad_request("text is required"));
    }

    let engine = state.engine().await?;
    let spk_id = req.spk_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
    tracing::info!(chars = text.chars().count(), spk_id, use_clone = req.use_clone, "generate request");

    let audio = match spk_id {
        Some(spk_id) => engine.generate_with_speaker(text, spk_id).await?,
        None => engine.generate_audio(text, req.use_clone).await?,
    };
    let Some(audio) = audio else {
        return Err(ApiError::internal("audio generation failed"));
    };

    let wav = to_wav_bytes(&audio.samples, audio.sample_rate)?;
    let filename = format!(
        "tts_{}.wav",
        chrono::Local::now().format("%Y%m%d_%H%M%S_%6f")
    );
    tokio::fs::create_dir_all(&state.settings.audio_dir)
        .await
        .map_err(Error::from)?;
    tokio::fs::write(state.settings.audio_dir.join(&filename), &wav)
        .await
        .map_err(Error::from)?;

    tracing::info!(
        filename = %filename,
        duration_secs = audio.duration_secs(),
        "audio generated"
    );

    Ok(Json(GenerateResponse {
        status: "success",
        audio_url: format!("{}/audio/{filename}", state.settings.public_url),
        audio: STANDARD.encode(&wav),
        format: "wav",
        sample_rate: audio.sample_rate,
        filename,
    }))
}

#[derive(Serialize)]
struct SpeakerAdded {
    status: &'static str,
    spk_id: String,
}

/// Generate a speaker id of the form `spk_<8 hex>`
#[must_use]
pub fn new_speaker_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("spk_{}", &hex[..8])
}

async fn add_speaker(
    State(state): State<Arc<TtsServiceState>>,
    mut multipart: Multipart,
) -> std::result::Result<Json<SpeakerAdded>, ApiError> {
    let mut audio = None;
    let mut prompt_text = String::new();
    let mut spk_id = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        match field.name() {
            Some("audio") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                audio = Some(bytes);
            }
            Some("prompt_text") => {
                prompt_text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
            }
            Some("spk_id") => {
                spk_id = field
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
    let prompt_text = prompt_text.trim();
    if prompt_text.is_empty() {
        return Err(ApiError::bad_request("prompt_text is required"));
    }
    let spk_id = match spk_id.trim() {
        "" => new_speaker_id(),
        id => id.to_string(),
    };

    let samples = load_reference(&audio, REFERENCE_SAMPLE_RATE)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    let engine = state.engine().await?;
    engine
        .add_speaker(&spk_id, &ReferenceVoice::new(samples, prompt_text))
        .await?;

    Ok(Json(SpeakerAdded {
        status: "success",
        spk_id,
    }))
}

#[derive(Deserialize)]
struct DeleteSpeakerRequest {
    #[serde(default)]
    spk_id: String,
}

async fn delete_speaker(
    State(state): State<Arc<TtsServiceState>>,
    Json(req): Json<DeleteSpeakerRequest>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let spk_id = req.spk_id.trim();
    if spk_id.is_empty() {
        return Err(ApiError::bad_request("spk_id is required"));
    }

    let engine = state.engine().await?;
    if !engine.remove_speaker(spk_id).await? {
        return Err(ApiError::not_found("speaker not found"));
    }
    Ok(Json(serde_json::json!({ "status": "success" })))
}

async fn speakers(State(state): State<Arc<TtsServiceState>>) -> Json<serde_json::Value> {
    let speakers = match state.engine.get() {
        Some(engine) => engine.speakers().await,
        None => Vec::new(),
    };
    Json(serde_json::json!({ "speakers": speakers }))
}

async fn audio(
    State(state): State<Arc<TtsServiceState>>,
    axum::extract::Path(filename): axum::extract::Path<String>,
) -> std::result::Result<Response, ApiError> {
    audio_file_response(&state.settings.audio_dir, &filename).await
}

/// Serve a WAV file from `dir`, refusing names that could escape it
///
/// # Errors
///
/// Returns 404 for unsafe or missing names
pub async fn audio_file_response(dir: &Path, filename: &str) -> std::result::Result<Response, ApiError> {
    if !is_safe_filename(filename) {
        tracing::warn!(filename, "rejected audio file name");
        return Err(ApiError::not_found("file not found"));
    }

    match tokio::fs::read(dir.join(filename)).await {
        Ok(bytes) => Ok(([(header::CONTENT_TYPE, "audio/wav")], bytes).into_response()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::not_found("file not found"))
        }
        Err(e) => Err(Error::from(e).into()),
    }
}

/// Build the TTS service router
pub fn router(state: Arc<TtsServiceState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/tts/generate", post(generate))
        .route("/tts/add_speaker", post(add_speaker))
        .route("/tts/delete_speaker", post(delete_speaker))
        .route("/tts/speakers", get(speakers))
        .route("/audio/{filename}", get(audio))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// The TTS service process
pub struct TtsServer {
    state: Arc<TtsServiceState>,
    port: u16,
}

impl TtsServer {
    pub fn new(state: Arc<TtsServiceState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Run the TTS service
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind TTS service: {e}")))?;

        tracing::info!(port = self.port, "TTS service listening");

        axum::serve(listener, router(self.state))
            .await
            .map_err(|e| Error::Config(format!("TTS service error: {e}")))?;

        Ok(())
    }

    /// Run the TTS service in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speaker_id_shape() {
        let id = new_speaker_id();
        assert!(id.starts_with("spk_"));
        assert_eq!(id.len(), 12);
        assert!(id[4..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_speaker_id());
    }
}
