//! Waveform post-processing and WAV conversion

use std::io::Cursor;
use std::path::Path;

use crate::{Error, Result};

/// Fade length applied to both ends of every segment, in seconds
pub const FADE_SECS: f32 = 0.01;

/// Sample rate the voice model expects reference audio at
pub const REFERENCE_SAMPLE_RATE: u32 = 16_000;

/// Scale samples so the loudest one sits at full scale
pub fn normalize(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
    if peak > 0.0 {
        for s in samples.iter_mut() {
            *s /= peak;
        }
    }
}

/// Apply a linear fade in and fade out
///
/// Clips no longer than two fade lengths are left untouched.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn fade_in_out(samples: &mut [f32], sample_rate: u32) {
    let fade = (sample_rate as f32 * FADE_SECS) as usize;
    if fade == 0 || samples.len() <= fade * 2 {
        return;
    }

    let len = samples.len();
    for i in 0..fade {
        let gain = i as f32 / fade as f32;
        samples[i] *= gain;
        samples[len - 1 - i] *= gain;
    }
}

/// Encode samples as mono 16-bit PCM WAV
///
/// The waveform is peak-normalized first.
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn to_wav_bytes(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let mut normalized = samples.to_vec();
    normalize(&mut normalized);
    samples_to_wav(&normalized, sample_rate)
}

/// Encode samples as mono 16-bit PCM WAV without touching levels
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Write samples to a WAV file, creating parent directories
///
/// # Errors
///
/// Returns error if encoding or writing fails
pub fn write_wav_file(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = to_wav_bytes(samples, sample_rate)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Decode a WAV file to mono f32 samples
///
/// Accepts 8/16/24/32-bit integer and 32-bit float data with any channel
/// count. Returns the samples and their sample rate.
///
/// # Errors
///
/// Returns error if the data is not a supported WAV file
#[allow(clippy::cast_precision_loss)]
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        (hound::SampleFormat::Int, bits @ 8..=32) => {
            let scale = (1_i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
        (format, bits) => {
            return Err(Error::Audio(format!(
                "unsupported WAV format: {format:?} {bits}-bit"
            )));
        }
    };

    let channels = usize::from(spec.channels.max(1));
    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok((mono, spec.sample_rate))
}

/// Decode a reference clip and bring it to `target_rate`
///
/// # Errors
///
/// Returns error if decoding or resampling fails, or the clip is silent
pub fn load_reference(bytes: &[u8], target_rate: u32) -> Result<Vec<f32>> {
    let (samples, rate) = decode_wav(bytes)?;
    if samples.is_empty() {
        return Err(Error::Audio("reference audio is empty".to_string()));
    }

    if rate == target_rate {
        Ok(samples)
    } else {
        tracing::debug!(from = rate, to = target_rate, "resampling reference audio");
        resample(&samples, rate, target_rate)
    }
}

/// Resample audio using rubato
///
/// The last partial chunk is zero-padded and the output trimmed to the
/// expected length.
///
/// # Errors
///
/// Returns error if the resampler cannot be built or fails
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let expected =
        (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).round() as usize;

    // The first `delay` output frames are filter latency, not signal
    let delay = resampler.output_delay();
    let mut chunks = input.chunks(chunk_size);
    let mut output = Vec::with_capacity(delay + expected);

    while output.len() < delay + expected {
        let mut block = chunks.next().map_or_else(Vec::new, <[f64]>::to_vec);
        block.resize(chunk_size, 0.0);
        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    output.drain(..delay);
    output.truncate(expected);

    Ok(output.iter().map(|&s| s as f32).collect())
}

/// Whether a file name is safe to join onto the audio directory
#[must_use]
pub fn is_safe_filename(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['/', '\\'])
        && !name.contains("..")
        && !name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_peak() {
        let mut samples = vec![0.1, -0.5, 0.25];
        normalize(&mut samples);
        assert!((samples[1] + 1.0).abs() < f32::EPSILON);
        assert!((samples[0] - 0.2).abs() < 1e-6);

        let mut silent = vec![0.0; 4];
        normalize(&mut silent);
        assert!(silent.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_fade_edges() {
        // 16 kHz: 160 sample fade
        let mut samples = vec![1.0; 1000];
        fade_in_out(&mut samples, 16_000);
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[999], 0.0);
        assert!(samples[80] > 0.4 && samples[80] < 0.6);
        assert_eq!(samples[500], 1.0);
    }

    #[test]
    fn test_short_clip_not_faded() {
        let mut samples = vec![1.0; 320];
        fade_in_out(&mut samples, 16_000);
        assert!(samples.iter().all(|s| *s == 1.0));
    }

    #[test]
    fn test_wav_header_and_scaling() {
        let bytes = to_wav_bytes(&[0.0, 0.25, -0.5], 24_000).unwrap();
        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_rate, 24_000);

        let values: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        // renormalized so -0.5 becomes full scale
        assert_eq!(values, vec![0, 16383, -32767]);
    }

    #[test]
    fn test_decode_stereo_mixdown() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..10 {
                writer.write_sample(16384_i16).unwrap();
                writer.write_sample(0_i16).unwrap();
            }
            writer.finalize().unwrap();
        }

        let (mono, rate) = decode_wav(&cursor.into_inner()).unwrap();
        assert_eq!(rate, 8_000);
        assert_eq!(mono.len(), 10);
        assert!((mono[0] - 0.25).abs() < 1e-4);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_wav(b"definitely not a wav").is_err());
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn test_resample_keeps_alignment() {
        let wave =
            |rate: f32, i: usize| 0.4 * (2.0 * std::f32::consts::PI * 5.0 * i as f32 / rate).sin();
        let input: Vec<f32> = (0..48_000).map(|i| wave(48_000.0, i)).collect();

        let output = resample(&input, 48_000, 16_000).unwrap();
        assert_eq!(output.len(), 16_000);
        for i in (1_000..15_000).step_by(250) {
            let diff = (output[i] - wave(16_000.0, i)).abs();
            assert!(diff < 0.01, "sample {i} off by {diff}");
        }
    }

    #[test]
    fn test_load_reference_resamples() {
        let samples: Vec<f32> = (0..48_000).map(|i| ((i % 100) as f32 / 100.0) - 0.5).collect();
        let wav = to_wav_bytes(&samples, 48_000).unwrap();
        let reference = load_reference(&wav, REFERENCE_SAMPLE_RATE).unwrap();
        assert_eq!(reference.len(), 16_000);
    }

    #[test]
    fn test_write_wav_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.wav");
        write_wav_file(&path, &[0.1, 0.2], 16_000).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_safe_filenames() {
        assert!(is_safe_filename("tts_20240101_000000_000001.wav"));
        assert!(!is_safe_filename("../secret.wav"));
        assert!(!is_safe_filename("a/b.wav"));
        assert!(!is_safe_filename("a\\b.wav"));
        assert!(!is_safe_filename(".hidden"));
        assert!(!is_safe_filename(""));
    }
}
