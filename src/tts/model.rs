//! Voice model seam and its HTTP implementation

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::audio::REFERENCE_SAMPLE_RATE;
use crate::{Error, Result};

/// Transcript of the bundled reference clip
pub const DEFAULT_PROMPT_TEXT: &str =
    "This is a test recording. Hello, hello, can you hear me? Let me check, don't rush.";

/// Output rate of the voice model server unless told otherwise
pub const DEFAULT_MODEL_SAMPLE_RATE: u32 = 24_000;

/// A cloned voice: prompt semantic tokens plus speaker embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceEmbedding {
    pub prompt_tokens: Vec<i64>,
    pub speaker_embedding: Vec<f32>,
}

/// Clone source for zero-shot synthesis
#[derive(Debug, Clone)]
pub struct ReferenceVoice {
    /// Mono samples at [`REFERENCE_SAMPLE_RATE`]
    pub samples: Vec<f32>,
    pub prompt_text: String,
}

impl ReferenceVoice {
    pub fn new(samples: Vec<f32>, prompt_text: impl Into<String>) -> Self {
        Self {
            samples,
            prompt_text: prompt_text.into(),
        }
    }
}

/// Result of synthesizing one segment
#[derive(Debug, Clone)]
pub struct SegmentOutput {
    pub samples: Vec<f32>,

    /// Voice extracted while synthesizing, when the model returns one
    pub embedding: Option<VoiceEmbedding>,
}

/// Opaque neural TTS model
#[async_trait]
pub trait VoiceModel: Send + Sync {
    /// Rate of the samples this model produces
    fn sample_rate(&self) -> u32;

    /// Synthesize by cloning the reference clip
    async fn zero_shot(&self, text: &str, reference: &ReferenceVoice) -> Result<SegmentOutput>;

    /// Synthesize with an already extracted voice
    async fn with_embedding(&self, text: &str, voice: &VoiceEmbedding) -> Result<Vec<f32>>;

    /// Synthesize with the model's default voice
    async fn builtin(&self, text: &str) -> Result<Vec<f32>>;

    /// Extract a reusable voice from a reference clip
    async fn extract_embedding(&self, reference: &ReferenceVoice) -> Result<VoiceEmbedding>;
}

/// Encode samples as base64 of little-endian f32
#[must_use]
pub fn encode_samples(samples: &[f32]) -> String {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    STANDARD.encode(bytes)
}

/// Decode base64 of little-endian f32 samples
///
/// # Errors
///
/// Returns error on invalid base64 or a length that is not a multiple of four
pub fn decode_samples(encoded: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| Error::Tts(format!("invalid audio encoding: {e}")))?;
    if bytes.len() % 4 != 0 {
        return Err(Error::Tts(format!(
            "audio payload of {} bytes is not f32 aligned",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Voice model served by an inference server over JSON
pub struct HttpVoiceModel {
    client: reqwest::Client,
    base_url: String,
    sample_rate: u32,
}

#[derive(Serialize)]
struct ReferencePayload<'a> {
    prompt_text: &'a str,
    prompt_audio: String,
    prompt_sample_rate: u32,
}

impl<'a> ReferencePayload<'a> {
    fn from_voice(reference: &'a ReferenceVoice) -> Self {
        Self {
            prompt_text: &reference.prompt_text,
            prompt_audio: encode_samples(&reference.samples),
            prompt_sample_rate: REFERENCE_SAMPLE_RATE,
        }
    }
}

#[derive(Deserialize)]
struct AudioResponse {
    audio: String,
}

#[derive(Deserialize)]
struct ZeroShotResponse {
    audio: String,
    #[serde(default)]
    prompt_tokens: Option<Vec<i64>>,
    #[serde(default)]
    speaker_embedding: Option<Vec<f32>>,
}

impl HttpVoiceModel {
    /// Create a client for the inference server at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            sample_rate: DEFAULT_MODEL_SAMPLE_RATE,
        })
    }

    #[must_use]
    pub const fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    async fn post<B: Serialize + Sync, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let url = format!("{}{path}", self.base_url);
        let response = self.client.post(&url).json(body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("voice model error {status}: {body}")));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl VoiceModel for HttpVoiceModel {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn zero_shot(&self, text: &str, reference: &ReferenceVoice) -> Result<SegmentOutput> {
        #[derive(Serialize)]
        struct Request<'a> {
            text: &'a str,
            #[serde(flatten)]
            reference: ReferencePayload<'a>,
        }

        let response: ZeroShotResponse = self
            .post(
                "/inference/zero_shot",
                &Request {
                    text,
                    reference: ReferencePayload::from_voice(reference),
                },
            )
            .await?;

        let embedding = match (response.prompt_tokens, response.speaker_embedding) {
            (Some(prompt_tokens), Some(speaker_embedding)) => Some(VoiceEmbedding {
                prompt_tokens,
                speaker_embedding,
            }),
            _ => None,
        };

        Ok(SegmentOutput {
            samples: decode_samples(&response.audio)?,
            embedding,
        })
    }

    async fn with_embedding(&self, text: &str, voice: &VoiceEmbedding) -> Result<Vec<f32>> {
        #[derive(Serialize)]
        struct Request<'a> {
            text: &'a str,
            prompt_tokens: &'a [i64],
            speaker_embedding: &'a [f32],
        }

        let response: AudioResponse = self
            .post(
                "/inference/embedding",
                &Request {
                    text,
                    prompt_tokens: &voice.prompt_tokens,
                    speaker_embedding: &voice.speaker_embedding,
                },
            )
            .await?;
        decode_samples(&response.audio)
    }

    async fn builtin(&self, text: &str) -> Result<Vec<f32>> {
        let response: AudioResponse = self
            .post("/inference/builtin", &serde_json::json!({ "text": text }))
            .await?;
        decode_samples(&response.audio)
    }

    async fn extract_embedding(&self, reference: &ReferenceVoice) -> Result<VoiceEmbedding> {
        self.post("/inference/extract", &ReferencePayload::from_voice(reference))
            .await
    }
}
