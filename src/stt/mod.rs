//! Streaming speech recognition
//!
//! Browsers post short chunks of 16 kHz mono PCM. A [`StreamingRecognizer`]
//! finds utterance boundaries by energy and a [`Transcriber`] turns finished
//! utterances (and, optionally, the running buffer) into text.

mod recognizer;
mod session;
mod transcriber;

pub use recognizer::{Endpoint, RecognizerSettings, SAMPLE_RATE, StreamingRecognizer, ms_to_samples};
pub use session::{ANONYMOUS, Recognition, RecognitionSession, RecognitionStatus, Recognizers, decode_pcm16};
pub use transcriber::{HttpTranscriber, Transcriber};

use crate::config::SttConfig;

impl From<&SttConfig> for RecognizerSettings {
    fn from(config: &SttConfig) -> Self {
        Self {
            energy_threshold: config.energy_threshold,
            silence_ms: config.silence_ms,
            min_speech_ms: config.min_speech_ms,
        }
    }
}
