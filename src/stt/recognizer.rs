//! Endpoint detection over a streamed waveform

/// Input sample rate of the recognizer
pub const SAMPLE_RATE: u32 = 16_000;

/// Thresholds of the energy-based endpoint detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognizerSettings {
    /// RMS above which a chunk counts as speech
    pub energy_threshold: f32,

    /// Trailing silence that ends an utterance
    pub silence_ms: u32,

    /// Speech (chunks above the threshold) required before an utterance may end
    pub min_speech_ms: u32,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self {
            energy_threshold: 0.01,
            silence_ms: 500,
            min_speech_ms: 300,
        }
    }
}

/// Outcome of feeding audio to the recognizer
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    /// Still inside (or waiting for) an utterance
    Pending,
    /// An utterance just ended; carries its samples
    Utterance(Vec<f32>),
}

/// Converts milliseconds to a sample count at [`SAMPLE_RATE`]
#[must_use]
pub const fn ms_to_samples(ms: u32) -> usize {
    (ms as usize) * (SAMPLE_RATE as usize) / 1000
}

/// Accumulates speech and reports when an utterance ends
#[derive(Debug)]
pub struct StreamingRecognizer {
    settings: RecognizerSettings,
    speaking: bool,
    buffer: Vec<f32>,
    speech_samples: usize,
    silence_samples: usize,
}

impl StreamingRecognizer {
    #[must_use]
    pub const fn new(settings: RecognizerSettings) -> Self {
        Self {
            settings,
            speaking: false,
            buffer: Vec::new(),
            speech_samples: 0,
            silence_samples: 0,
        }
    }

    /// Feed 16-bit PCM samples
    pub fn accept_waveform(&mut self, pcm: &[i16]) -> Endpoint {
        if pcm.is_empty() {
            return Endpoint::Pending;
        }

        let samples: Vec<f32> = pcm.iter().map(|&s| f32::from(s) / 32768.0).collect();
        let energy = calculate_energy(&samples);
        let is_speech = energy > self.settings.energy_threshold;

        if !self.speaking {
            if is_speech {
                self.speaking = true;
                self.speech_samples = samples.len();
                self.buffer = samples;
                self.silence_samples = 0;
                tracing::trace!(energy, "speech started");
            }
            return Endpoint::Pending;
        }

        self.buffer.extend_from_slice(&samples);
        if is_speech {
            self.speech_samples += samples.len();
            self.silence_samples = 0;
        } else {
            self.silence_samples += samples.len();
        }

        if self.silence_samples >= ms_to_samples(self.settings.silence_ms) {
            if self.speech_samples >= ms_to_samples(self.settings.min_speech_ms) {
                tracing::debug!(
                    samples = self.buffer.len(),
                    speech = self.speech_samples,
                    "utterance complete"
                );
                let utterance = std::mem::take(&mut self.buffer);
                self.reset();
                return Endpoint::Utterance(utterance);
            }

            // A blip followed by silence is noise
            tracing::trace!(speech = self.speech_samples, "discarding short noise burst");
            self.reset();
        }

        Endpoint::Pending
    }

    /// Hand out whatever speech is buffered
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        let buffered = std::mem::take(&mut self.buffer);
        self.reset();
        (!buffered.is_empty()).then_some(buffered)
    }

    /// Speech buffered so far in the current utterance
    #[must_use]
    pub fn buffered(&self) -> &[f32] {
        &self.buffer
    }

    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn reset(&mut self) {
        self.speaking = false;
        self.buffer.clear();
        self.speech_samples = 0;
        self.silence_samples = 0;
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
pub(crate) fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    // 100 ms chunks at 16 kHz
    fn loud() -> Vec<i16> {
        vec![8000; 1600]
    }

    fn quiet() -> Vec<i16> {
        vec![0; 1600]
    }

    #[test]
    fn test_energy_calculation() {
        assert!(calculate_energy(&[0.0; 100]) < 0.001);
        assert!(calculate_energy(&[0.5; 100]) > 0.4);
        assert!(calculate_energy(&[]) < f32::EPSILON);
    }

    #[test]
    fn test_leading_silence_discarded() {
        let mut rec = StreamingRecognizer::new(RecognizerSettings::default());
        for _ in 0..10 {
            assert_eq!(rec.accept_waveform(&quiet()), Endpoint::Pending);
        }
        assert!(!rec.is_speaking());
        assert!(rec.buffered().is_empty());
        assert!(rec.flush().is_none());
    }

    #[test]
    fn test_utterance_after_trailing_silence() {
        let mut rec = StreamingRecognizer::new(RecognizerSettings::default());
        for _ in 0..5 {
            assert_eq!(rec.accept_waveform(&loud()), Endpoint::Pending);
        }
        for _ in 0..4 {
            assert_eq!(rec.accept_waveform(&quiet()), Endpoint::Pending);
        }

        // fifth quiet chunk reaches 500 ms of silence
        let Endpoint::Utterance(samples) = rec.accept_waveform(&quiet()) else {
            panic!("expected utterance");
        };
        assert_eq!(samples.len(), 10 * 1600);
        assert!(!rec.is_speaking());
        assert!(rec.buffered().is_empty());
    }

    #[test]
    fn test_click_is_dropped_with_defaults() {
        let mut rec = StreamingRecognizer::new(RecognizerSettings::default());
        // 20 ms click
        rec.accept_waveform(&[8000; 320]);
        assert!(rec.is_speaking());
        for _ in 0..5 {
            assert_eq!(rec.accept_waveform(&quiet()), Endpoint::Pending);
        }
        assert!(!rec.is_speaking());
        assert!(rec.buffered().is_empty());
    }

    #[test]
    fn test_trailing_silence_does_not_count_as_speech() {
        // 200 ms of speech is under the 300 ms minimum even with 500 ms of silence after it
        let mut rec = StreamingRecognizer::new(RecognizerSettings::default());
        rec.accept_waveform(&loud());
        rec.accept_waveform(&loud());
        for _ in 0..10 {
            assert_eq!(rec.accept_waveform(&quiet()), Endpoint::Pending);
        }
        assert!(!rec.is_speaking());

        // Speech resumes and is long enough this time
        for _ in 0..3 {
            rec.accept_waveform(&loud());
        }
        for _ in 0..4 {
            assert_eq!(rec.accept_waveform(&quiet()), Endpoint::Pending);
        }
        assert!(matches!(rec.accept_waveform(&quiet()), Endpoint::Utterance(_)));
    }

    #[test]
    fn test_flush_returns_buffer() {
        let mut rec = StreamingRecognizer::new(RecognizerSettings::default());
        rec.accept_waveform(&loud());
        rec.accept_waveform(&loud());
        let flushed = rec.flush().unwrap();
        assert_eq!(flushed.len(), 3200);
        assert!(rec.flush().is_none());
    }

    #[test]
    fn test_ms_conversion() {
        assert_eq!(ms_to_samples(500), 8000);
        assert_eq!(ms_to_samples(300), 4800);
    }
}
