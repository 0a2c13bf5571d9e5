//! Shared test utilities
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use futures::stream::{self, BoxStream, StreamExt};
use magic_mirror::api::{ApiServerBuilder, AppState};
use magic_mirror::dialogue::{ChatBackend, ChatMessage};
use magic_mirror::security::SessionKeys;
use magic_mirror::stt::{RecognizerSettings, Recognizers, Transcriber};
use magic_mirror::tts::{
    ReferenceVoice, SegmentOutput, SpeechService, SpeechServiceError, VoiceEmbedding, VoiceModel,
};
use magic_mirror::{DbPool, Error, Result, db};
use secrecy::SecretString;
use tempfile::TempDir;
use tower::ServiceExt;

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Chat backend that streams a canned reply word by word
pub struct FakeChat {
    pub reply: String,
    pub fail_stream: bool,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeChat {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            fail_stream: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn last_request(&self) -> Vec<ChatMessage> {
        self.requests.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ChatBackend for FakeChat {
    async fn stream(&self, messages: &[ChatMessage]) -> Result<BoxStream<'static, Result<String>>> {
        self.requests.lock().unwrap().push(messages.to_vec());
        if self.fail_stream {
            return Err(Error::Llm("stream refused".to_string()));
        }
        let words: Vec<Result<String>> = self
            .reply
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(stream::iter(words).boxed())
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.requests.lock().unwrap().push(messages.to_vec());
        Ok(self.reply.clone())
    }
}

/// TTS service stand-in that records what the app asked for
#[derive(Default)]
pub struct FakeSpeech {
    pub unavailable: bool,
    pub generated: Mutex<Vec<(String, Option<String>)>>,
    pub added: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl SpeechService for FakeSpeech {
    async fn generate(
        &self,
        text: &str,
        spk_id: Option<&str>,
    ) -> std::result::Result<serde_json::Value, SpeechServiceError> {
        if self.unavailable {
            return Err(SpeechServiceError::Unavailable);
        }
        self.generated
            .lock()
            .unwrap()
            .push((text.to_string(), spk_id.map(String::from)));
        Ok(serde_json::json!({
            "status": "success",
            "audio_url": "http://localhost:5001/audio/tts_test.wav",
            "filename": "tts_test.wav",
        }))
    }

    async fn add_speaker(
        &self,
        _audio: Vec<u8>,
        _filename: &str,
        _prompt_text: &str,
        spk_id: &str,
    ) -> std::result::Result<String, SpeechServiceError> {
        if self.unavailable {
            return Err(SpeechServiceError::Unavailable);
        }
        self.added.lock().unwrap().push(spk_id.to_string());
        Ok(spk_id.to_string())
    }

    async fn delete_speaker(&self, spk_id: &str) -> std::result::Result<(), SpeechServiceError> {
        if self.unavailable {
            return Err(SpeechServiceError::Unavailable);
        }
        self.deleted.lock().unwrap().push(spk_id.to_string());
        Ok(())
    }
}

/// Transcriber that always hears the same sentence
pub struct FakeTranscriber {
    pub text: String,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        assert!(wav.starts_with(b"RIFF"), "transcriber expects WAV input");
        Ok(self.text.clone())
    }
}

/// Voice model producing constant waveforms
///
/// Segment lengths and delays are looked up by a marker character so tests
/// can make segments finish out of order.
pub struct FakeVoiceModel {
    pub sample_rate: u32,
    pub zero_shot_calls: Mutex<usize>,
    pub embedding_calls: Mutex<usize>,
    pub builtin_calls: Mutex<usize>,
    pub used_embeddings: Mutex<Vec<VoiceEmbedding>>,
    pub shapes: Vec<(char, usize, u64)>,
    pub fail_marker: Option<char>,
}

impl FakeVoiceModel {
    pub fn new() -> Self {
        Self {
            sample_rate: 24_000,
            zero_shot_calls: Mutex::new(0),
            embedding_calls: Mutex::new(0),
            builtin_calls: Mutex::new(0),
            used_embeddings: Mutex::new(Vec::new()),
            shapes: Vec::new(),
            fail_marker: None,
        }
    }

    fn render(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(marker) = self.fail_marker
            && text.contains(marker)
        {
            return Err(Error::Tts(format!("cannot say {text}")));
        }
        let len = self
            .shapes
            .iter()
            .find(|(c, _, _)| text.contains(*c))
            .map_or(1_000, |(_, len, _)| *len);
        Ok(vec![0.5; len])
    }

    async fn delay(&self, text: &str) {
        if let Some((_, _, ms)) = self.shapes.iter().find(|(c, _, _)| text.contains(*c)) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
    }

    /// Voice extracted while cloning `text`; distinct per shape so cache writers can be told apart
    pub fn voice_for(&self, text: &str) -> VoiceEmbedding {
        self.shapes
            .iter()
            .find(|(c, _, _)| text.contains(*c))
            .map_or_else(test_embedding, |(c, _, _)| VoiceEmbedding {
                prompt_tokens: vec![i64::from(u32::from(*c))],
                speaker_embedding: vec![0.3],
            })
    }

    pub fn used_embeddings(&self) -> Vec<VoiceEmbedding> {
        self.used_embeddings.lock().unwrap().clone()
    }

    pub fn zero_shots(&self) -> usize {
        *self.zero_shot_calls.lock().unwrap()
    }

    pub fn embedding_uses(&self) -> usize {
        *self.embedding_calls.lock().unwrap()
    }

    pub fn builtins(&self) -> usize {
        *self.builtin_calls.lock().unwrap()
    }
}

pub fn test_embedding() -> VoiceEmbedding {
    VoiceEmbedding {
        prompt_tokens: vec![1, 2, 3],
        speaker_embedding: vec![0.1, 0.2],
    }
}

#[async_trait]
impl VoiceModel for FakeVoiceModel {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn zero_shot(&self, text: &str, _reference: &ReferenceVoice) -> Result<SegmentOutput> {
        *self.zero_shot_calls.lock().unwrap() += 1;
        self.delay(text).await;
        Ok(SegmentOutput {
            samples: self.render(text)?,
            embedding: Some(self.voice_for(text)),
        })
    }

    async fn with_embedding(&self, text: &str, voice: &VoiceEmbedding) -> Result<Vec<f32>> {
        *self.embedding_calls.lock().unwrap() += 1;
        self.used_embeddings.lock().unwrap().push(voice.clone());
        self.delay(text).await;
        self.render(text)
    }

    async fn builtin(&self, text: &str) -> Result<Vec<f32>> {
        *self.builtin_calls.lock().unwrap() += 1;
        self.delay(text).await;
        self.render(text)
    }

    async fn extract_embedding(&self, _reference: &ReferenceVoice) -> Result<VoiceEmbedding> {
        Ok(test_embedding())
    }
}

/// Main app wired to fakes
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub chat: Arc<FakeChat>,
    pub speech: Arc<FakeSpeech>,
    pub audio_dir: TempDir,
}

pub struct TestAppBuilder {
    chat: FakeChat,
    speech: FakeSpeech,
    transcriber: Option<String>,
}

impl TestAppBuilder {
    pub fn new() -> Self {
        Self {
            chat: FakeChat::new("Mirror mirror on the wall"),
            speech: FakeSpeech::default(),
            transcriber: None,
        }
    }

    pub fn chat(mut self, chat: FakeChat) -> Self {
        self.chat = chat;
        self
    }

    pub fn speech(mut self, speech: FakeSpeech) -> Self {
        self.speech = speech;
        self
    }

    pub fn transcriber(mut self, text: &str) -> Self {
        self.transcriber = Some(text.to_string());
        self
    }

    pub fn build(self) -> TestApp {
        let audio_dir = TempDir::new().expect("failed to create audio dir");
        let chat = Arc::new(self.chat);
        let speech = Arc::new(self.speech);
        let sessions = SessionKeys::new(&SecretString::from("test-secret".to_string()), 1);

        let mut builder = ApiServerBuilder::new(
            0,
            setup_test_db(),
            chat.clone(),
            speech.clone(),
            sessions,
        )
        .audio_dir(audio_dir.path().to_path_buf())
        .system_prompt("You are a test mirror.".to_string())
        .password_rounds(1_000);

        if let Some(text) = self.transcriber {
            let recognizers = Recognizers::new(
                Arc::new(FakeTranscriber { text }),
                RecognizerSettings::default(),
                0,
            );
            builder = builder.recognizers(Arc::new(recognizers));
        }

        let server = builder.build();
        TestApp {
            router: server.router(),
            state: server.state(),
            chat,
            speech,
            audio_dir,
        }
    }
}

/// Decoded response
pub struct TestResponse {
    pub status: StatusCode,
    pub set_cookie: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response is not JSON")
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .map(|v| v.to_str().unwrap().to_string());
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        TestResponse {
            status,
            set_cookie,
            content_type,
            body,
        }
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> TestResponse {
        let mut request = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        self.send(request.body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(
        &self,
        uri: &str,
        cookie: Option<&str>,
        body: &serde_json::Value,
    ) -> TestResponse {
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        self.send(request.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn post_form(&self, uri: &str, cookie: Option<&str>, form: &str) -> TestResponse {
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        self.send(request.body(Body::from(form.to_string())).unwrap())
            .await
    }

    pub async fn delete(&self, uri: &str, cookie: Option<&str>) -> TestResponse {
        let mut request = Request::builder().method("DELETE").uri(uri);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        self.send(request.body(Body::empty()).unwrap()).await
    }

    /// Register and log in; returns the `Cookie` header value
    pub async fn login_as(&self, username: &str) -> String {
        let form = format!("username={username}&password=secret");
        let registered = self.post_form("/register", None, &form).await;
        assert_eq!(registered.status, StatusCode::CREATED);

        let response = self.post_form("/login", None, &form).await;
        assert_eq!(response.status, StatusCode::OK);
        session_cookie(&response)
    }
}

/// `name=value` part of a `Set-Cookie` header
pub fn session_cookie(response: &TestResponse) -> String {
    let header = response.set_cookie.as_deref().expect("no Set-Cookie header");
    header.split(';').next().unwrap().to_string()
}

/// Build a multipart body with text fields and one file part
pub fn multipart_body(
    boundary: &str,
    fields: &[(&str, &str)],
    file: Option<(&str, &str, &[u8])>,
) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((name, filename, bytes)) = file {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: audio/wav\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

pub fn multipart_request(uri: &str, cookie: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            "multipart/form-data; boundary=mirror-boundary",
        );
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    request.body(Body::from(body)).unwrap()
}

/// A short 16 kHz sine clip as WAV bytes
pub fn sine_wav(seconds: f32) -> Vec<u8> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let len = (16_000.0 * seconds) as usize;
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..len)
        .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 16_000.0).sin())
        .collect();
    magic_mirror::tts::samples_to_wav(&samples, 16_000).unwrap()
}
