//! TOML configuration file loading
//!
//! Supports `~/.config/magicmirror/config.toml` (or `$MAGICMIRROR_CONFIG`) as a
//! persistent config source. All fields are optional; the file is a partial
//! overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct MirrorConfigFile {
    /// Main web app settings
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Dialogue model settings
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Speech recognition settings
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Speech synthesis settings
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Login/session settings
    #[serde(default)]
    pub auth: AuthFileConfig,
}

/// Main web app configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    pub port: Option<u16>,
    pub data_dir: Option<String>,
    pub database_path: Option<String>,
    pub audio_dir: Option<String>,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// "remote" (chat-completion API) or "local" (self-hosted model server)
    pub provider: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    pub url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub energy_threshold: Option<f32>,
    pub silence_ms: Option<u32>,
    pub min_speech_ms: Option<u32>,
    pub partial_interval_ms: Option<u32>,
}

/// Synthesis configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    pub service_url: Option<String>,
    pub service_port: Option<u16>,
    pub public_url: Option<String>,
    pub model_url: Option<String>,
    pub reference_audio: Option<String>,
    pub reference_prompt_text: Option<String>,
    pub speakers_file: Option<String>,
    pub max_workers: Option<usize>,
}

/// Session configuration
#[derive(Debug, Default, Deserialize)]
pub struct AuthFileConfig {
    pub secret_key: Option<String>,
    pub session_ttl_hours: Option<i64>,
    pub password_rounds: Option<u32>,
}

/// Load the TOML config file from the standard path
///
/// Returns `MirrorConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> MirrorConfigFile {
    let Some(path) = config_file_path() else {
        return MirrorConfigFile::default();
    };

    if !path.exists() {
        return MirrorConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                MirrorConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            MirrorConfigFile::default()
        }
    }
}

/// Return the config file path: `$MAGICMIRROR_CONFIG` or `~/.config/magicmirror/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("MAGICMIRROR_CONFIG") {
        return Some(PathBuf::from(path));
    }
    directories::BaseDirs::new().map(|d| d.config_dir().join("magicmirror").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_parses() {
        let toml = r#"
            [server]
            port = 8080

            [tts]
            max_workers = 2
            reference_audio = "/srv/voices/ref.wav"
        "#;
        let fc: MirrorConfigFile = toml::from_str(toml).unwrap();
        assert_eq!(fc.server.port, Some(8080));
        assert_eq!(fc.tts.max_workers, Some(2));
        assert!(fc.llm.model.is_none());
        assert!(fc.auth.secret_key.is_none());
    }

    #[test]
    fn test_empty_file_is_default() {
        let fc: MirrorConfigFile = toml::from_str("").unwrap();
        assert!(fc.server.port.is_none());
        assert!(fc.stt.url.is_none());
    }
}
