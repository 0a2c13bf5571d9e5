//! HTTP API server for the MagicMirror web app

mod account;
pub mod auth;
mod chat;
pub mod error;
pub mod health;
mod history;
mod recognize;
mod speakers;
mod speech;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use auth::CurrentUser;
pub use error::ApiError;

use crate::Result;
use crate::db::{ConversationRepo, DbPool, SpeakerRepo, UserRepo};
use crate::dialogue::{ChatBackend, DEFAULT_SYSTEM_PROMPT};
use crate::security::{DEFAULT_ROUNDS, SessionKeys};
use crate::stt::Recognizers;
use crate::tts::SpeechService;
use crate::tts::service::MAX_UPLOAD_BYTES;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub users: UserRepo,
    pub conversations: ConversationRepo,
    pub speakers: SpeakerRepo,
    pub chat: Arc<dyn ChatBackend>,

    /// Absent when no transcription server is configured
    pub recognizers: Option<Arc<Recognizers>>,
    pub speech: Arc<dyn SpeechService>,
    pub sessions: Arc<SessionKeys>,

    /// Where the TTS service writes generated audio
    pub audio_dir: PathBuf,
    pub system_prompt: String,
    pub password_rounds: u32,
}

/// Builder for the API server
pub struct ApiServerBuilder {
    port: u16,
    db: DbPool,
    chat: Arc<dyn ChatBackend>,
    speech: Arc<dyn SpeechService>,
    sessions: Arc<SessionKeys>,
    recognizers: Option<Arc<Recognizers>>,
    audio_dir: PathBuf,
    system_prompt: String,
    password_rounds: u32,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(
        port: u16,
        db: DbPool,
        chat: Arc<dyn ChatBackend>,
        speech: Arc<dyn SpeechService>,
        sessions: SessionKeys,
    ) -> Self {
        Self {
            port,
            db,
            chat,
            speech,
            sessions: Arc::new(sessions),
            recognizers: None,
            audio_dir: PathBuf::from("audio"),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            password_rounds: DEFAULT_ROUNDS,
        }
    }

    /// Enable speech recognition
    #[must_use]
    pub fn recognizers(mut self, recognizers: Arc<Recognizers>) -> Self {
        self.recognizers = Some(recognizers);
        self
    }

    /// Set the shared audio directory
    #[must_use]
    pub fn audio_dir(mut self, dir: PathBuf) -> Self {
        self.audio_dir = dir;
        self
    }

    /// Set the persona prompt
    #[must_use]
    pub fn system_prompt(mut self, prompt: String) -> Self {
        self.system_prompt = prompt;
        self
    }

    /// Set PBKDF2 rounds for new password hashes
    #[must_use]
    pub const fn password_rounds(mut self, rounds: u32) -> Self {
        self.password_rounds = rounds;
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let state = AppState {
            users: UserRepo::new(self.db.clone()),
            conversations: ConversationRepo::new(self.db.clone()),
            speakers: SpeakerRepo::new(self.db.clone()),
            db: self.db,
            chat: self.chat,
            recognizers: self.recognizers,
            speech: self.speech,
            sessions: self.sessions,
            audio_dir: self.audio_dir,
            system_prompt: self.system_prompt,
            password_rounds: self.password_rounds,
        };

        ApiServer {
            state: Arc::new(state),
            port: self.port,
        }
    }
}

/// HTTP API server
pub struct ApiServer {
    state: Arc<AppState>,
    port: u16,
}

impl ApiServer {
    /// Build the router
    pub fn router(&self) -> Router {
        let state = self.state.clone();

        let protected = Router::new()
            .merge(account::personal_router())
            .merge(chat::router())
            .merge(speech::router())
            .merge(history::router())
            .merge(speakers::router())
            .route_layer(axum::middleware::from_fn_with_state(
                state.clone(),
                auth::require_session,
            ));

        let router = Router::new()
            .merge(account::router())
            .merge(recognize::router())
            .merge(speech::public_router())
            .merge(protected)
            .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
            .with_state(state.clone())
            .merge(health::router())
            .merge(health::ready_router(state));

        // CORS layer for cross-origin requests from frontend
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        if self.state.recognizers.is_none() {
            tracing::warn!("no transcription server configured, /api/recognize is disabled");
        }

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }

    /// Shared state, for embedding the server elsewhere
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }
}
