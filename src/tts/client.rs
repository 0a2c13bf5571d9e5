//! HTTP client the main app uses to reach the TTS service

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use thiserror::Error;

/// Timeout for synthesis and speaker registration
pub const GENERATE_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for speaker removal
pub const DELETE_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures talking to the TTS service
#[derive(Debug, Error)]
pub enum SpeechServiceError {
    /// Nothing is listening at the service address
    #[error("TTS service is not running")]
    Unavailable,

    #[error("TTS service timed out")]
    Timeout,

    /// The service answered with a non-success status
    #[error("TTS service error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("TTS service request failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for SpeechServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            Self::Unavailable
        } else if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Other(e.to_string())
        }
    }
}

/// Operations the main app needs from the TTS service
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Synthesize `text`, with a registered speaker when `spk_id` is given
    ///
    /// Returns the service's JSON body unchanged.
    async fn generate(
        &self,
        text: &str,
        spk_id: Option<&str>,
    ) -> Result<serde_json::Value, SpeechServiceError>;

    /// Register a voice and return the id the service stored it under
    async fn add_speaker(
        &self,
        audio: Vec<u8>,
        filename: &str,
        prompt_text: &str,
        spk_id: &str,
    ) -> Result<String, SpeechServiceError>;

    async fn delete_speaker(&self, spk_id: &str) -> Result<(), SpeechServiceError>;
}

/// [`SpeechService`] over HTTP
pub struct HttpSpeechService {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

#[derive(Deserialize)]
struct AddSpeakerBody {
    #[serde(default)]
    spk_id: String,
}

impl HttpSpeechService {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SpeechServiceError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|b| b.error)
            .unwrap_or(text);
        Err(SpeechServiceError::Upstream {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl SpeechService for HttpSpeechService {
    async fn generate(
        &self,
        text: &str,
        spk_id: Option<&str>,
    ) -> Result<serde_json::Value, SpeechServiceError> {
        let body = match spk_id {
            Some(spk_id) => serde_json::json!({ "text": text, "spk_id": spk_id, "use_clone": false }),
            None => serde_json::json!({ "text": text, "use_clone": true }),
        };

        let response = self
            .client
            .post(self.url("/tts/generate"))
            .timeout(GENERATE_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn add_speaker(
        &self,
        audio: Vec<u8>,
        filename: &str,
        prompt_text: &str,
        spk_id: &str,
    ) -> Result<String, SpeechServiceError> {
        let part = multipart::Part::bytes(audio)
            .file_name(filename.to_string())
            .mime_str("audio/wav")?;
        let form = multipart::Form::new()
            .part("audio", part)
            .text("prompt_text", prompt_text.to_string())
            .text("spk_id", spk_id.to_string());

        let response = self
            .client
            .post(self.url("/tts/add_speaker"))
            .timeout(GENERATE_TIMEOUT)
            .multipart(form)
            .send()
            .await?;
        let body: AddSpeakerBody = Self::check(response).await?.json().await?;

        if body.spk_id.is_empty() {
            return Err(SpeechServiceError::Other(
                "TTS service returned no speaker id".to_string(),
            ));
        }
        Ok(body.spk_id)
    }

    async fn delete_speaker(&self, spk_id: &str) -> Result<(), SpeechServiceError> {
        let response = self
            .client
            .post(self.url("/tts/delete_speaker"))
            .timeout(DELETE_TIMEOUT)
            .json(&serde_json::json!({ "spk_id": spk_id }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let service = HttpSpeechService::new(&format!("http://127.0.0.1:{port}/"));
        let err = service.generate("hello", None).await.unwrap_err();
        assert!(matches!(err, SpeechServiceError::Unavailable), "{err:?}");
        assert_eq!(err.to_string(), "TTS service is not running");
    }

    #[test]
    fn test_base_url_trimmed() {
        let service = HttpSpeechService::new("http://localhost:5001/");
        assert_eq!(service.url("/tts/speakers"), "http://localhost:5001/tts/speakers");
    }
}
