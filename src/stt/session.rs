//! Per-caller recognition sessions

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use super::recognizer::{Endpoint, RecognizerSettings, SAMPLE_RATE, StreamingRecognizer, ms_to_samples};
use super::transcriber::Transcriber;
use crate::Result;
use crate::tts::samples_to_wav;

/// Whether a transcript is still growing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionStatus {
    Partial,
    Complete,
}

/// Transcript returned for each chunk of audio
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recognition {
    pub text: String,
    pub status: RecognitionStatus,
}

impl Recognition {
    fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: RecognitionStatus::Partial,
        }
    }

    fn complete(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: RecognitionStatus::Complete,
        }
    }
}

/// Decode little-endian 16-bit PCM; a trailing odd byte is ignored
#[must_use]
pub fn decode_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect()
}

/// A recognizer paired with a transcriber
pub struct RecognitionSession {
    recognizer: StreamingRecognizer,
    transcriber: Arc<dyn Transcriber>,
    partial_interval: usize,
    since_partial: usize,
    last_partial: String,
}

impl RecognitionSession {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        settings: RecognizerSettings,
        partial_interval_ms: u32,
    ) -> Self {
        Self {
            recognizer: StreamingRecognizer::new(settings),
            transcriber,
            partial_interval: ms_to_samples(partial_interval_ms),
            since_partial: 0,
            last_partial: String::new(),
        }
    }

    /// Feed a chunk of 16-bit PCM bytes
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    pub async fn accept(&mut self, pcm: &[u8]) -> Result<Recognition> {
        let samples = decode_pcm16(pcm);

        match self.recognizer.accept_waveform(&samples) {
            Endpoint::Utterance(audio) => {
                self.clear_partial();
                let text = self.transcribe(&audio).await?;
                tracing::debug!(text = %text, "utterance recognized");
                Ok(Recognition::complete(text))
            }
            Endpoint::Pending => {
                if !self.recognizer.is_speaking() {
                    self.clear_partial();
                } else if self.partial_interval > 0 {
                    self.since_partial += samples.len();
                    if self.since_partial >= self.partial_interval {
                        self.since_partial = 0;
                        let buffered = self.recognizer.buffered().to_vec();
                        self.last_partial = self.transcribe(&buffered).await?;
                    }
                }
                Ok(Recognition::partial(self.last_partial.clone()))
            }
        }
    }

    /// Transcribe whatever is buffered as the final result
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    pub async fn finish(&mut self) -> Result<Recognition> {
        self.clear_partial();
        let text = match self.recognizer.flush() {
            Some(audio) => self.transcribe(&audio).await?,
            None => String::new(),
        };
        Ok(Recognition::complete(text))
    }

    fn clear_partial(&mut self) {
        self.since_partial = 0;
        self.last_partial.clear();
    }

    async fn transcribe(&self, samples: &[f32]) -> Result<String> {
        let wav = samples_to_wav(samples, SAMPLE_RATE)?;
        self.transcriber.transcribe(&wav).await
    }
}

/// Key used for callers without a session
pub const ANONYMOUS: &str = "anonymous";

/// One recognition session per caller
pub struct Recognizers {
    transcriber: Arc<dyn Transcriber>,
    settings: RecognizerSettings,
    partial_interval_ms: u32,
    sessions: Mutex<HashMap<String, Arc<Mutex<RecognitionSession>>>>,
}

impl Recognizers {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        settings: RecognizerSettings,
        partial_interval_ms: u32,
    ) -> Self {
        Self {
            transcriber,
            settings,
            partial_interval_ms,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The session for `key`, created on first use
    pub async fn session(&self, key: &str) -> Arc<Mutex<RecognitionSession>> {
        let mut sessions = self.sessions.lock().await;
        Arc::clone(sessions.entry(key.to_string()).or_insert_with(|| {
            tracing::debug!(key, "recognition session created");
            Arc::new(Mutex::new(RecognitionSession::new(
                Arc::clone(&self.transcriber),
                self.settings,
                self.partial_interval_ms,
            )))
        }))
    }

    /// Drop the session for `key`
    pub async fn remove(&self, key: &str) {
        self.sessions.lock().await.remove(key);
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
