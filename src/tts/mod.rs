//! Voice-cloning speech synthesis
//!
//! The engine splits text into segments, synthesizes them concurrently
//! through a [`VoiceModel`] and stitches the results back in order. The
//! [`service`] module puts the engine behind HTTP and [`client`] is how the
//! main app talks to it.

pub mod audio;
pub mod client;
mod engine;
mod model;
pub mod service;
mod speakers;
mod splitter;

pub use audio::{
    FADE_SECS, REFERENCE_SAMPLE_RATE, decode_wav, load_reference, samples_to_wav, to_wav_bytes,
    write_wav_file,
};
pub use client::{HttpSpeechService, SpeechService, SpeechServiceError};
pub use engine::{MAX_WORKERS, SynthesisEngine, SynthesizedAudio, worker_count};
pub use model::{
    DEFAULT_MODEL_SAMPLE_RATE, DEFAULT_PROMPT_TEXT, HttpVoiceModel, ReferenceVoice,
    SegmentOutput, VoiceEmbedding, VoiceModel, decode_samples, encode_samples,
};
pub use service::{EngineSettings, TtsServer, TtsServiceState};
pub use speakers::SpeakerRegistry;
pub use splitter::{MAX_SEGMENT_CHARS, has_word_char, split_text};
