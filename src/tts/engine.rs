//! Segment-synthesis orchestration
//!
//! Text is split into segments that are synthesized concurrently on a bounded
//! number of workers and reassembled in their original order. In clone mode
//! the first successful zero-shot segment fills a voice cache that every later
//! segment (and later request) reuses.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;

use super::audio::{fade_in_out, normalize, write_wav_file};
use super::model::{ReferenceVoice, VoiceEmbedding, VoiceModel};
use super::speakers::SpeakerRegistry;
use super::splitter::{has_word_char, split_text};
use crate::{Error, Result};

/// Upper bound on concurrent segment syntheses
pub const MAX_WORKERS: usize = 4;

/// Synthesized waveform
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SynthesizedAudio {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Voice source for one request
#[derive(Clone)]
enum VoiceSource {
    /// Clone the reference, filling and then reusing the voice cache
    Clone(Arc<ReferenceVoice>),
    /// Clone the reference on every segment without caching
    Reference(Arc<ReferenceVoice>),
    /// A registered speaker
    Speaker(Arc<VoiceEmbedding>),
    /// The model's default voice
    Builtin,
}

type VoiceCache = Arc<RwLock<Option<Arc<VoiceEmbedding>>>>;

/// Number of workers for a batch of `segments`
#[must_use]
pub fn worker_count(segments: usize, override_workers: Option<usize>) -> usize {
    if let Some(n) = override_workers {
        return n.max(1);
    }
    let cpus = std::thread::available_parallelism().map_or(2, std::num::NonZeroUsize::get);
    segments.min(cpus).min(MAX_WORKERS).max(1)
}

/// Orchestrates split, fan-out, caching and reassembly over a [`VoiceModel`]
pub struct SynthesisEngine {
    model: Arc<dyn VoiceModel>,
    reference: Option<Arc<ReferenceVoice>>,
    voice_cache: VoiceCache,
    speakers: RwLock<SpeakerRegistry>,
    max_workers: Option<usize>,
    audio_dir: PathBuf,
}

impl SynthesisEngine {
    pub fn new(
        model: Arc<dyn VoiceModel>,
        reference: Option<ReferenceVoice>,
        speakers: SpeakerRegistry,
        audio_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            model,
            reference: reference.map(Arc::new),
            voice_cache: Arc::new(RwLock::new(None)),
            speakers: RwLock::new(speakers),
            max_workers: None,
            audio_dir: audio_dir.into(),
        }
    }

    #[must_use]
    pub const fn with_max_workers(mut self, max_workers: Option<usize>) -> Self {
        self.max_workers = max_workers;
        self
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.model.sample_rate()
    }

    #[must_use]
    pub const fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    #[must_use]
    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    /// Whether the clone voice has been extracted yet
    pub async fn voice_cached(&self) -> bool {
        self.voice_cache.read().await.is_some()
    }

    /// Synthesize text with the reference voice or the model's own voice
    ///
    /// Returns `None` when there is nothing to say or every segment failed.
    ///
    /// # Errors
    ///
    /// Segment failures are logged and dropped, never returned
    pub async fn generate_audio(
        &self,
        text: &str,
        use_clone: bool,
    ) -> Result<Option<SynthesizedAudio>> {
        let text = text.trim();
        if text.is_empty() {
            tracing::info!("empty text, nothing to synthesize");
            return Ok(None);
        }

        let source = match (&self.reference, use_clone) {
            (Some(reference), true) => VoiceSource::Clone(Arc::clone(reference)),
            (Some(reference), false) => VoiceSource::Reference(Arc::clone(reference)),
            (None, clone) => {
                if clone {
                    tracing::warn!("clone requested without a reference voice, using builtin voice");
                }
                VoiceSource::Builtin
            }
        };

        Ok(self.synthesize(text, source).await)
    }

    /// Synthesize text with a registered speaker
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the speaker is not registered
    pub async fn generate_with_speaker(
        &self,
        text: &str,
        spk_id: &str,
    ) -> Result<Option<SynthesizedAudio>> {
        let voice = self
            .speakers
            .read()
            .await
            .get(spk_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("speaker {spk_id}")))?;

        let text = text.trim();
        if text.is_empty() {
            tracing::info!("empty text, nothing to synthesize");
            return Ok(None);
        }

        Ok(self
            .synthesize(text, VoiceSource::Speaker(Arc::new(voice)))
            .await)
    }

    /// Synthesize and write a WAV file
    ///
    /// Defaults to `<audio_dir>/tts_output_<timestamp>.wav`. Returns `None`
    /// when nothing was synthesized.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub async fn text_to_file(
        &self,
        text: &str,
        use_clone: bool,
        output: Option<PathBuf>,
    ) -> Result<Option<PathBuf>> {
        let Some(audio) = self.generate_audio(text, use_clone).await? else {
            return Ok(None);
        };

        let path = output.unwrap_or_else(|| {
            let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            self.audio_dir.join(format!("tts_output_{stamp}.wav"))
        });
        write_wav_file(&path, &audio.samples, audio.sample_rate)?;

        tracing::info!(
            path = %path.display(),
            duration_secs = audio.duration_secs(),
            "audio written"
        );
        Ok(Some(path))
    }

    /// Extract and register a speaker's voice
    ///
    /// # Errors
    ///
    /// Returns error if extraction or persisting the registry fails
    pub async fn add_speaker(&self, spk_id: &str, reference: &ReferenceVoice) -> Result<()> {
        let voice = self.model.extract_embedding(reference).await?;

        let mut speakers = self.speakers.write().await;
        speakers.insert(spk_id, voice);
        speakers.save()?;

        tracing::info!(spk_id, total = speakers.len(), "speaker registered");
        Ok(())
    }

    /// Forget a speaker; returns whether it was registered
    ///
    /// # Errors
    ///
    /// Returns error if persisting the registry fails
    pub async fn remove_speaker(&self, spk_id: &str) -> Result<bool> {
        let mut speakers = self.speakers.write().await;
        if speakers.remove(spk_id).is_none() {
            return Ok(false);
        }
        speakers.save()?;

        tracing::info!(spk_id, "speaker removed");
        Ok(true)
    }

    /// Registered speaker ids, sorted
    pub async fn speakers(&self) -> Vec<String> {
        self.speakers.read().await.ids()
    }

    async fn synthesize(&self, text: &str, source: VoiceSource) -> Option<SynthesizedAudio> {
        let segments = split_text(text);
        if segments.is_empty() {
            tracing::info!("no speakable segments");
            return None;
        }

        let total = segments.len();
        let workers = worker_count(total, self.max_workers);
        let semaphore = Arc::new(Semaphore::new(workers));
        let sample_rate = self.model.sample_rate();
        tracing::debug!(segments = total, workers, "synthesizing");

        let mut tasks = JoinSet::new();
        for (index, segment) in (1..).zip(segments) {
            let model = Arc::clone(&self.model);
            let cache = Arc::clone(&self.voice_cache);
            let semaphore = Arc::clone(&semaphore);
            let source = source.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, Err(Error::Tts("worker pool closed".to_string())));
                };
                let result = synthesize_segment(model.as_ref(), &segment, &source, &cache).await;
                (index, result)
            });
        }

        let mut done: BTreeMap<usize, Vec<f32>> = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(Some(mut samples)))) => {
                    normalize(&mut samples);
                    fade_in_out(&mut samples, sample_rate);
                    tracing::debug!(index, total, "segment done");
                    done.insert(index, samples);
                }
                Ok((index, Ok(None))) => {
                    tracing::debug!(index, "segment skipped");
                }
                Ok((index, Err(e))) => {
                    tracing::error!(index, error = %e, "segment failed");
                }
                Err(e) => {
                    tracing::error!(error = %e, "segment task panicked");
                }
            }
        }

        if done.is_empty() {
            tracing::warn!(segments = total, "no segment was synthesized");
            return None;
        }

        let samples: Vec<f32> = done.into_values().flatten().collect();
        Some(SynthesizedAudio {
            samples,
            sample_rate,
        })
    }
}

/// Synthesize one segment; `Ok(None)` means it had nothing to speak
async fn synthesize_segment(
    model: &dyn VoiceModel,
    segment: &str,
    source: &VoiceSource,
    cache: &VoiceCache,
) -> Result<Option<Vec<f32>>> {
    if !has_word_char(segment) {
        return Ok(None);
    }

    let samples = match source {
        VoiceSource::Clone(reference) => {
            let cached = cache.read().await.clone();
            if let Some(voice) = cached {
                model.with_embedding(segment, &voice).await?
            } else {
                let output = model.zero_shot(segment, reference).await?;
                if let Some(voice) = output.embedding {
                    let mut slot = cache.write().await;
                    if slot.is_none() {
                        *slot = Some(Arc::new(voice));
                        tracing::info!("voice cache filled");
                    }
                }
                output.samples
            }
        }
        VoiceSource::Reference(reference) => model.zero_shot(segment, reference).await?.samples,
        VoiceSource::Speaker(voice) => model.with_embedding(segment, voice).await?,
        VoiceSource::Builtin => model.builtin(segment).await?,
    };

    Ok(Some(samples))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count() {
        assert_eq!(worker_count(1, None), 1);
        assert!(worker_count(10, None) <= MAX_WORKERS);
        assert!(worker_count(10, None) >= 1);
        assert_eq!(worker_count(10, Some(0)), 1);
        assert_eq!(worker_count(2, Some(8)), 8);
        assert_eq!(worker_count(0, None), 1);
    }

    #[test]
    fn test_duration() {
        let audio = SynthesizedAudio {
            samples: vec![0.0; 24_000],
            sample_rate: 24_000,
        };
        assert!((audio.duration_secs() - 1.0).abs() < f32::EPSILON);
    }
}
