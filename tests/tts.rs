//! Synthesis engine and TTS service integration tests

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use magic_mirror::Error;
use magic_mirror::tts::service::{self, EngineSettings, TtsServiceState};
use magic_mirror::tts::{
    ReferenceVoice, SpeakerRegistry, SynthesisEngine, decode_wav, samples_to_wav,
};
use tempfile::TempDir;
use tower::ServiceExt;

mod common;
use common::{FakeVoiceModel, multipart_body, multipart_request, sine_wav};

fn reference() -> ReferenceVoice {
    ReferenceVoice::new(vec![0.1; 16_000], "reference words")
}

fn engine_with(
    model: FakeVoiceModel,
    reference: Option<ReferenceVoice>,
    dir: &TempDir,
) -> (Arc<FakeVoiceModel>, SynthesisEngine) {
    let model = Arc::new(model);
    let speakers = SpeakerRegistry::load(dir.path().join("speakers.json")).unwrap();
    let engine = SynthesisEngine::new(
        model.clone(),
        reference,
        speakers,
        dir.path().join("audio"),
    )
    .with_max_workers(Some(3));
    (model, engine)
}

#[tokio::test]
async fn test_segments_reassemble_in_order() {
    let dir = TempDir::new().unwrap();
    let mut model = FakeVoiceModel::new();
    // First segment is slowest so completion order is reversed
    model.shapes = vec![('一', 1_000, 80), ('二', 3_000, 40), ('三', 2_000, 0)];
    let (_, engine) = engine_with(model, None, &dir);

    let audio = engine
        .generate_audio("一一。二二！三三？", false)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(audio.sample_rate, 24_000);
    assert_eq!(audio.samples.len(), 6_000);
    // Each segment fades in from silence; boundaries sit at 1000 and 4000
    assert!(audio.samples[1_000].abs() < 1e-6);
    assert!(audio.samples[4_000].abs() < 1e-6);
    assert!((audio.samples[3_000] - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_voice_cache_filled_once() {
    let dir = TempDir::new().unwrap();
    let (model, engine) = engine_with(FakeVoiceModel::new(), Some(reference()), &dir);
    assert!(!engine.voice_cached().await);

    engine.generate_audio("Hello there.", true).await.unwrap().unwrap();
    assert_eq!(model.zero_shots(), 1);
    assert!(engine.voice_cached().await);

    engine.generate_audio("Hello again.", true).await.unwrap().unwrap();
    assert_eq!(model.zero_shots(), 1);
    assert_eq!(model.embedding_uses(), 1);
}

#[tokio::test]
async fn test_first_finished_segment_owns_voice_cache() {
    let dir = TempDir::new().unwrap();
    let mut model = FakeVoiceModel::new();
    // All three miss the cache; the last segment finishes first
    model.shapes = vec![('一', 1_000, 80), ('二', 1_000, 40), ('三', 1_000, 0)];
    let (model, engine) = engine_with(model, Some(reference()), &dir);

    engine
        .generate_audio("一一。二二！三三？", true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(model.zero_shots(), 3);
    assert!(engine.voice_cached().await);
    assert!(model.used_embeddings().is_empty());

    // Later writers were ignored, so the next request clones with the third segment's voice
    engine.generate_audio("Hello again!", true).await.unwrap().unwrap();
    assert_eq!(model.zero_shots(), 3);
    assert_eq!(model.used_embeddings(), vec![model.voice_for("三")]);
    assert_ne!(model.voice_for("三"), model.voice_for("一"));
}

#[tokio::test]
async fn test_reference_mode_skips_cache() {
    let dir = TempDir::new().unwrap();
    let (model, engine) = engine_with(FakeVoiceModel::new(), Some(reference()), &dir);

    engine.generate_audio("One! Two!", false).await.unwrap().unwrap();
    assert_eq!(model.zero_shots(), 2);
    assert!(!engine.voice_cached().await);
}

#[tokio::test]
async fn test_builtin_voice_without_reference() {
    let dir = TempDir::new().unwrap();
    let (model, engine) = engine_with(FakeVoiceModel::new(), None, &dir);
    assert!(!engine.has_reference());

    engine.generate_audio("Hello.", true).await.unwrap().unwrap();
    assert_eq!(model.builtins(), 1);
    assert_eq!(model.zero_shots(), 0);
}

#[tokio::test]
async fn test_failed_segments_are_dropped() {
    let dir = TempDir::new().unwrap();
    let mut model = FakeVoiceModel::new();
    model.fail_marker = Some('x');
    let (_, engine) = engine_with(model, None, &dir);

    let audio = engine
        .generate_audio("good one! bad x! good two!", false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(audio.samples.len(), 2_000);

    let nothing = engine.generate_audio("x only", false).await.unwrap();
    assert!(nothing.is_none());
}

#[tokio::test]
async fn test_empty_and_punctuation_text() {
    let dir = TempDir::new().unwrap();
    let (model, engine) = engine_with(FakeVoiceModel::new(), None, &dir);

    assert!(engine.generate_audio("   ", true).await.unwrap().is_none());
    assert!(engine.generate_audio("。！？", true).await.unwrap().is_none());
    assert_eq!(model.builtins(), 0);
}

#[tokio::test]
async fn test_speakers_round_trip_through_registry() {
    let dir = TempDir::new().unwrap();
    let (model, engine) = engine_with(FakeVoiceModel::new(), None, &dir);

    let err = engine.generate_with_speaker("hi", "ghost").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    engine.add_speaker("spk_1", &reference()).await.unwrap();
    assert_eq!(engine.speakers().await, vec!["spk_1".to_string()]);

    let audio = engine.generate_with_speaker("hi", "spk_1").await.unwrap();
    assert!(audio.is_some());
    assert_eq!(model.embedding_uses(), 1);

    let reloaded = SpeakerRegistry::load(dir.path().join("speakers.json")).unwrap();
    assert!(reloaded.get("spk_1").is_some());

    assert!(engine.remove_speaker("spk_1").await.unwrap());
    assert!(!engine.remove_speaker("spk_1").await.unwrap());
    let reloaded = SpeakerRegistry::load(dir.path().join("speakers.json")).unwrap();
    assert!(reloaded.is_empty());
}

#[tokio::test]
async fn test_text_to_file_default_name() {
    let dir = TempDir::new().unwrap();
    let (_, engine) = engine_with(FakeVoiceModel::new(), None, &dir);

    let path = engine.text_to_file("Hello.", true, None).await.unwrap().unwrap();
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("tts_output_"));
    assert!(name.ends_with(".wav"));

    let (samples, rate) = decode_wav(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(rate, 24_000);
    assert_eq!(samples.len(), 1_000);
}

fn service_state(
    dir: &TempDir,
    reference_audio: Option<std::path::PathBuf>,
) -> Arc<TtsServiceState> {
    let settings = EngineSettings {
        reference_audio,
        reference_prompt_text: "reference words".to_string(),
        speakers_file: dir.path().join("speakers.json"),
        max_workers: Some(2),
        audio_dir: dir.path().join("audio"),
        public_url: "http://mirror.local:5001".to_string(),
    };
    Arc::new(TtsServiceState::new(Arc::new(FakeVoiceModel::new()), settings))
}

async fn call(
    state: &Arc<TtsServiceState>,
    request: Request<Body>,
) -> (StatusCode, serde_json::Value) {
    let response = service::router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
}

fn json_post(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_service_initializes_lazily() {
    let dir = TempDir::new().unwrap();
    let state = service_state(&dir, None);

    let get = |uri: &str| Request::builder().uri(uri).body(Body::empty()).unwrap();

    let (status, health) = call(&state, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["tts_initialized"], false);

    let (_, speakers) = call(&state, get("/tts/speakers")).await;
    assert_eq!(speakers["speakers"], serde_json::json!([]));
    assert!(!state.initialized());

    let (status, generated) = call(
        &state,
        json_post("/tts/generate", &serde_json::json!({"text": "Hello mirror."})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(generated["status"], "success");
    assert_eq!(generated["format"], "wav");
    assert_eq!(generated["sample_rate"], 24_000);

    let filename = generated["filename"].as_str().unwrap();
    assert!(filename.starts_with("tts_"));
    assert_eq!(
        generated["audio_url"],
        format!("http://mirror.local:5001/audio/{filename}")
    );
    let wav = BASE64.decode(generated["audio"].as_str().unwrap()).unwrap();
    assert!(wav.starts_with(b"RIFF"));
    assert!(dir.path().join("audio").join(filename).exists());

    let (_, health) = call(&state, get("/health")).await;
    assert_eq!(health["tts_initialized"], true);

    let response = service::router(state.clone())
        .oneshot(get(&format!("/audio/{filename}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wav");
}

#[tokio::test]
async fn test_service_concurrent_first_requests_share_engine() {
    let dir = TempDir::new().unwrap();
    let state = service_state(&dir, None);

    let (a, b) = tokio::join!(state.engine(), state.engine());
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
}

#[tokio::test]
async fn test_service_generate_validation() {
    let dir = TempDir::new().unwrap();
    let state = service_state(&dir, None);

    let (status, body) = call(
        &state,
        json_post("/tts/generate", &serde_json::json!({"text": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = call(
        &state,
        json_post(
            "/tts/generate",
            &serde_json::json!({"text": "hi", "spk_id": "ghost"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(
        &state,
        json_post("/tts/generate", &serde_json::json!({"text": "。。"})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "audio generation failed");
}

#[tokio::test]
async fn test_service_clone_mode_uses_reference_file() {
    let dir = TempDir::new().unwrap();
    let reference_path = dir.path().join("ref.wav");
    std::fs::write(&reference_path, sine_wav(0.5)).unwrap();
    let state = service_state(&dir, Some(reference_path));

    let engine = state.engine().await.unwrap();
    assert!(engine.has_reference());

    let missing = TempDir::new().unwrap();
    let state = service_state(&missing, Some(missing.path().join("absent.wav")));
    assert!(!state.engine().await.unwrap().has_reference());
}

#[tokio::test]
async fn test_service_speaker_routes() {
    let dir = TempDir::new().unwrap();
    let state = service_state(&dir, None);

    let body = multipart_body(
        "mirror-boundary",
        &[("prompt_text", "hello there"), ("spk_id", "user_1_spk_abcd1234")],
        Some(("audio", "voice.wav", &sine_wav(0.5))),
    );
    let (status, added) = call(&state, multipart_request("/tts/add_speaker", None, body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(added["spk_id"], "user_1_spk_abcd1234");

    let body = multipart_body(
        "mirror-boundary",
        &[("prompt_text", "hello there")],
        Some(("audio", "voice.wav", &sine_wav(0.5))),
    );
    let (_, generated) = call(&state, multipart_request("/tts/add_speaker", None, body)).await;
    assert!(generated["spk_id"].as_str().unwrap().starts_with("spk_"));

    let body = multipart_body("mirror-boundary", &[("prompt_text", "hello")], None);
    let (status, _) = call(&state, multipart_request("/tts/add_speaker", None, body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let list = Request::builder().uri("/tts/speakers").body(Body::empty()).unwrap();
    let (_, speakers) = call(&state, list).await;
    assert_eq!(speakers["speakers"].as_array().unwrap().len(), 2);

    let (status, _) = call(
        &state,
        json_post(
            "/tts/delete_speaker",
            &serde_json::json!({"spk_id": "user_1_spk_abcd1234"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &state,
        json_post(
            "/tts/delete_speaker",
            &serde_json::json!({"spk_id": "user_1_spk_abcd1234"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[test]
fn test_wav_helpers_agree() {
    let wav = samples_to_wav(&[0.0, 0.5, -0.5], 24_000).unwrap();
    let (samples, rate) = decode_wav(&wav).unwrap();
    assert_eq!(rate, 24_000);
    assert_eq!(samples.len(), 3);
    assert!((samples[1] - 0.5).abs() < 1e-3);
}
