//! Configuration management for MagicMirror
//!
//! Precedence is env > TOML file > defaults for every field.

pub mod file;

use std::path::PathBuf;

use secrecy::SecretString;

use crate::dialogue::{DEFAULT_SYSTEM_PROMPT, GenerationParams};
use crate::tts::DEFAULT_PROMPT_TEXT;

/// Default port of the main web app
pub const DEFAULT_PORT: u16 = 5000;

/// Default port of the TTS service
pub const DEFAULT_TTS_PORT: u16 = 5001;

/// MagicMirror configuration
#[derive(Debug)]
pub struct Config {
    /// Main web app settings
    pub server: ServerConfig,

    /// Dialogue model settings
    pub llm: LlmConfig,

    /// Speech recognition settings
    pub stt: SttConfig,

    /// Speech synthesis settings (service + client side)
    pub tts: TtsConfig,

    /// Login/session settings
    pub auth: AuthConfig,
}

/// Main web app configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Data directory (database, speaker registry)
    pub data_dir: PathBuf,

    /// `SQLite` database file
    pub database_path: PathBuf,

    /// Directory holding generated WAV files, shared with the TTS service
    pub audio_dir: PathBuf,
}

/// Which kind of chat model sits behind the dialogue wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProvider {
    /// Hosted chat-completion API (e.g. `DeepSeek`)
    #[default]
    Remote,
    /// Self-hosted quantized model served over the same wire format
    Local,
}

impl LlmProvider {
    /// Parse from string representation
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "local" => Self::Local,
            _ => Self::Remote,
        }
    }
}

/// Dialogue model configuration
#[derive(Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,

    /// Base URL of the OpenAI-compatible API (`BASE_URL`)
    pub base_url: String,

    /// API key (`DEEPSEEK_API_KEY`)
    pub api_key: Option<SecretString>,

    /// Model identifier (`MODEL`)
    pub model: String,

    /// Persona prompt sent ahead of every conversation
    pub system_prompt: String,

    /// Per-request timeout
    pub timeout_secs: u64,
}

impl LlmConfig {
    /// Sampling parameters for the configured provider
    #[must_use]
    pub const fn params(&self) -> GenerationParams {
        match self.provider {
            LlmProvider::Remote => GenerationParams::remote(),
            LlmProvider::Local => GenerationParams::local(),
        }
    }
}

/// Speech recognition configuration
#[derive(Debug)]
pub struct SttConfig {
    /// Transcription server base URL; recognition is disabled when unset
    pub url: Option<String>,
    pub model: String,
    pub api_key: Option<SecretString>,

    /// RMS above which a chunk counts as speech
    pub energy_threshold: f32,

    /// Trailing silence that ends an utterance
    pub silence_ms: u32,

    /// Minimum buffered audio before an utterance may end
    pub min_speech_ms: u32,

    /// How often to refresh partial transcripts (0 disables)
    pub partial_interval_ms: u32,
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Where the main app reaches the TTS service
    pub service_url: String,

    /// Port the TTS service listens on
    pub service_port: u16,

    /// Base URL used in `audio_url` fields handed to browsers
    pub public_url: String,

    /// Voice model inference server
    pub model_url: String,

    /// Reference clip for zero-shot cloning
    pub reference_audio: Option<PathBuf>,

    /// Transcript of the reference clip
    pub reference_prompt_text: String,

    /// Persisted speaker registry
    pub speakers_file: PathBuf,

    /// Worker override for segment synthesis
    pub max_workers: Option<usize>,
}

/// Session configuration
#[derive(Debug)]
pub struct AuthConfig {
    /// HMAC key for session cookies
    pub secret_key: SecretString,

    /// Session lifetime
    pub session_ttl_hours: i64,

    /// PBKDF2 rounds for new password hashes
    pub password_rounds: u32,
}

/// Default data directory: `~/.local/share/magicmirror` on Linux
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/magicmirror"),
        |d| d.data_dir().join("magicmirror"),
    )
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env(key).and_then(|v| v.trim().parse().ok())
}

impl Config {
    /// Load configuration from env, the TOML file and defaults
    #[must_use]
    pub fn load() -> Self {
        let fc = file::load_config_file();

        // Server (env > toml > default)
        let data_dir = env("MAGICMIRROR_DATA_DIR")
            .or(fc.server.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        if let Err(e) = std::fs::create_dir_all(&data_dir) {
            tracing::warn!(
                path = %data_dir.display(),
                error = %e,
                "failed to create data directory"
            );
        }

        let server = ServerConfig {
            port: env_parse("MAGICMIRROR_PORT")
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
            database_path: env("MAGICMIRROR_DB_PATH")
                .or(fc.server.database_path)
                .map_or_else(|| data_dir.join("magicmirror.db"), PathBuf::from),
            audio_dir: env("MAGICMIRROR_AUDIO_DIR")
                .or(fc.server.audio_dir)
                .map_or_else(|| data_dir.join("audio"), PathBuf::from),
            data_dir: data_dir.clone(),
        };

        // LLM: the bare names match the historical .env layout
        let provider = env("MAGICMIRROR_LLM_PROVIDER")
            .or(fc.llm.provider)
            .map(|s| LlmProvider::from_str(&s))
            .unwrap_or_default();
        let llm = LlmConfig {
            provider,
            base_url: env("BASE_URL")
                .or(fc.llm.base_url)
                .unwrap_or_else(|| match provider {
                    LlmProvider::Remote => "https://api.deepseek.com".to_string(),
                    LlmProvider::Local => "http://localhost:8080/v1".to_string(),
                }),
            api_key: env("DEEPSEEK_API_KEY")
                .or(fc.llm.api_key)
                .map(SecretString::from),
            model: env("MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| "deepseek-chat".to_string()),
            system_prompt: env("MAGICMIRROR_SYSTEM_PROMPT")
                .or(fc.llm.system_prompt)
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            timeout_secs: env_parse("MAGICMIRROR_LLM_TIMEOUT")
                .or(fc.llm.timeout_secs)
                .unwrap_or(120),
        };

        if llm.provider == LlmProvider::Remote && llm.api_key.is_none() {
            tracing::warn!("DEEPSEEK_API_KEY is not set; remote chat requests will likely fail");
        }

        let stt = SttConfig {
            url: env("MAGICMIRROR_STT_URL").or(fc.stt.url),
            model: env("MAGICMIRROR_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            api_key: env("MAGICMIRROR_STT_API_KEY")
                .or(fc.stt.api_key)
                .map(SecretString::from),
            energy_threshold: fc.stt.energy_threshold.unwrap_or(0.01),
            silence_ms: fc.stt.silence_ms.unwrap_or(500),
            min_speech_ms: fc.stt.min_speech_ms.unwrap_or(300),
            partial_interval_ms: env_parse("MAGICMIRROR_STT_PARTIAL_MS")
                .or(fc.stt.partial_interval_ms)
                .unwrap_or(0),
        };

        let service_port = env_parse("MAGICMIRROR_TTS_PORT")
            .or(fc.tts.service_port)
            .unwrap_or(DEFAULT_TTS_PORT);
        let service_url = env("MAGICMIRROR_TTS_URL")
            .or(fc.tts.service_url)
            .unwrap_or_else(|| format!("http://localhost:{service_port}"));
        let tts = TtsConfig {
            public_url: env("MAGICMIRROR_TTS_PUBLIC_URL")
                .or(fc.tts.public_url)
                .unwrap_or_else(|| service_url.clone()),
            service_url,
            service_port,
            model_url: env("MAGICMIRROR_TTS_MODEL_URL")
                .or(fc.tts.model_url)
                .unwrap_or_else(|| "http://localhost:50000".to_string()),
            reference_audio: env("REF_AUDIO_PATH")
                .or(fc.tts.reference_audio)
                .map(PathBuf::from),
            reference_prompt_text: env("MAGICMIRROR_REF_PROMPT_TEXT")
                .or(fc.tts.reference_prompt_text)
                .unwrap_or_else(|| DEFAULT_PROMPT_TEXT.to_string()),
            speakers_file: env("MAGICMIRROR_SPEAKERS_FILE")
                .or(fc.tts.speakers_file)
                .map_or_else(|| data_dir.join("speakers.json"), PathBuf::from),
            max_workers: env_parse("MAGICMIRROR_TTS_WORKERS").or(fc.tts.max_workers),
        };

        let secret_key = env("MAGICMIRROR_SECRET_KEY")
            .or(fc.auth.secret_key)
            .unwrap_or_else(|| {
                tracing::warn!(
                    "MAGICMIRROR_SECRET_KEY not set; generated a random key, sessions will not survive restarts"
                );
                crate::security::random_secret()
            });
        let auth = AuthConfig {
            secret_key: SecretString::from(secret_key),
            session_ttl_hours: env_parse("MAGICMIRROR_SESSION_TTL_HOURS")
                .or(fc.auth.session_ttl_hours)
                .unwrap_or(24 * 7),
            password_rounds: env_parse("MAGICMIRROR_PASSWORD_ROUNDS")
                .or(fc.auth.password_rounds)
                .unwrap_or(crate::security::DEFAULT_ROUNDS),
        };

        Self {
            server,
            llm,
            stt,
            tts,
            auth,
        }
    }
}
