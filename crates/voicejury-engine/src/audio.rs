//! WAV loading and envelope primitives
//!
//! The engine only ever sees separated stems, which arrive as PCM WAV.
//! Everything downstream (envelope, sync, onsets) works on mono `f32`
//! buffers at a reduced sample rate.

use hound::{SampleFormat, WavReader};
use std::path::Path;

use voicejury_core::{Error, Result};

/// Mono audio buffer.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Load a WAV file and downmix to mono by averaging channels.
pub fn load_wav_mono(path: &Path) -> Result<AudioBuffer> {
    let mut reader = WavReader::open(path)
        .map_err(|e| Error::CorruptAudio(format!("{}: {}", path.display(), e)))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, _) => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::CorruptAudio(format!("{}: {}", path.display(), e)))?,
        (SampleFormat::Int, bits) => {
            let scale = (1i64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::CorruptAudio(format!("{}: {}", path.display(), e)))?
        }
    };

    let frames = interleaved.len() / channels;
    let mut samples = Vec::with_capacity(frames);
    for frame in interleaved.chunks_exact(channels) {
        samples.push(frame.iter().sum::<f32>() / channels as f32);
    }

    Ok(AudioBuffer {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Resample by linear interpolation. Envelope analysis tolerates this —
/// it never feeds playback.
pub fn resample(buffer: &AudioBuffer, target_rate: u32) -> AudioBuffer {
    if buffer.sample_rate == target_rate || buffer.samples.is_empty() {
        return AudioBuffer {
            samples: buffer.samples.clone(),
            sample_rate: target_rate,
        };
    }

    let ratio = buffer.sample_rate as f64 / target_rate as f64;
    let out_len = (buffer.samples.len() as f64 / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let a = buffer.samples[idx];
        let b = *buffer.samples.get(idx + 1).unwrap_or(&a);
        out.push(a + (b - a) * frac);
    }
    AudioBuffer {
        samples: out,
        sample_rate: target_rate,
    }
}

/// Rectified moving-average envelope, same length as the input
/// (prefix-sum implementation of a centred boxcar).
pub fn moving_average_envelope(samples: &[f32], window: usize) -> Vec<f32> {
    if samples.is_empty() || window == 0 {
        return Vec::new();
    }
    let n = samples.len();
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0f64);
    for s in samples {
        prefix.push(prefix.last().unwrap() + s.abs() as f64);
    }

    let half = window / 2;
    let mut env = Vec::with_capacity(n);
    for i in 0..n {
        let lo = i.saturating_sub(half);
        let hi = (i + window - half).min(n);
        env.push(((prefix[hi] - prefix[lo]) / (hi - lo) as f64) as f32);
    }
    env
}

/// Normalise to zero mean and unit variance. Returns `None` for
/// near-silent input (std below 1e-8).
pub fn standardize(values: &[f32]) -> Option<Vec<f32>> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|v| *v as f64).sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|v| (*v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    let std = variance.sqrt();
    if std < 1e-8 {
        return None;
    }
    Some(
        values
            .iter()
            .map(|v| ((*v as f64 - mean) / std) as f32)
            .collect(),
    )
}

/// Energy-based onset times in seconds: rising edges of the envelope
/// climbing above an adaptive threshold, with a refractory gap so one
/// attack yields one onset.
pub fn detect_onsets(buffer: &AudioBuffer) -> Vec<f64> {
    let window = (buffer.sample_rate as usize / 100).max(1); // 10 ms
    let env = moving_average_envelope(&buffer.samples, window);
    if env.is_empty() {
        return Vec::new();
    }

    let mean = env.iter().sum::<f32>() / env.len() as f32;
    let threshold = mean * 1.5;
    let min_gap = (buffer.sample_rate as f64 * 0.1) as usize; // 100 ms

    let mut onsets = Vec::new();
    let mut above = false;
    let mut last_onset: Option<usize> = None;
    for (i, value) in env.iter().enumerate() {
        if *value > threshold && !above {
            above = true;
            let ok_gap = last_onset.is_none_or(|prev| i - prev >= min_gap);
            if ok_gap {
                onsets.push(i as f64 / buffer.sample_rate as f64);
                last_onset = Some(i);
            }
        } else if *value <= threshold && above {
            above = false;
        }
    }
    onsets
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::path::Path;

    /// Write a mono 16-bit WAV built from (start_s, duration_s, freq_hz)
    /// tone bursts over silence.
    pub fn write_burst_wav(
        path: &Path,
        sample_rate: u32,
        total_seconds: f64,
        bursts: &[(f64, f64, f64)],
    ) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let n = (total_seconds * sample_rate as f64) as usize;
        let mut samples = vec![0.0f64; n];
        for &(start, duration, freq) in bursts {
            let s = (start * sample_rate as f64) as usize;
            let e = (((start + duration) * sample_rate as f64) as usize).min(n);
            for (k, sample) in samples[s..e].iter_mut().enumerate() {
                let t = k as f64 / sample_rate as f64;
                *sample = (2.0 * std::f64::consts::PI * freq * t).sin() * 0.8;
            }
        }
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in samples {
            writer.write_sample((s * i16::MAX as f64) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_support::write_burst_wav;

    #[test]
    fn load_and_downmix_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_burst_wav(&path, 8000, 1.0, &[(0.0, 1.0, 440.0)]);

        let buffer = load_wav_mono(&path).unwrap();
        assert_eq!(buffer.sample_rate, 8000);
        assert_eq!(buffer.samples.len(), 8000);
        assert!((buffer.duration_seconds() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn corrupt_wav_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"definitely not a wav").unwrap();
        assert!(matches!(
            load_wav_mono(&path).unwrap_err(),
            Error::CorruptAudio(_)
        ));
    }

    #[test]
    fn resample_halves_length() {
        let buffer = AudioBuffer {
            samples: (0..16000).map(|i| (i % 100) as f32 / 100.0).collect(),
            sample_rate: 16000,
        };
        let out = resample(&buffer, 8000);
        assert_eq!(out.sample_rate, 8000);
        assert!((out.samples.len() as i64 - 8000).abs() <= 1);
    }

    #[test]
    fn envelope_tracks_bursts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("burst.wav");
        write_burst_wav(&path, 8000, 2.0, &[(0.5, 0.5, 440.0)]);
        let buffer = load_wav_mono(&path).unwrap();

        let env = moving_average_envelope(&buffer.samples, 400);
        assert_eq!(env.len(), buffer.samples.len());
        // Energy inside the burst dwarfs the silence before it
        let quiet = env[800]; // 0.1 s
        let loud = env[6000]; // 0.75 s
        assert!(loud > quiet * 10.0);
    }

    #[test]
    fn standardize_rejects_silence() {
        assert!(standardize(&vec![0.0f32; 1000]).is_none());
        let standardized = standardize(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        let mean: f32 = standardized.iter().sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-6);
    }

    #[test]
    fn onsets_land_near_burst_starts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("onsets.wav");
        write_burst_wav(
            &path,
            8000,
            3.0,
            &[(0.5, 0.3, 440.0), (1.5, 0.3, 330.0), (2.4, 0.3, 550.0)],
        );
        let buffer = load_wav_mono(&path).unwrap();
        let onsets = detect_onsets(&buffer);

        assert_eq!(onsets.len(), 3);
        assert!((onsets[0] - 0.5).abs() < 0.05);
        assert!((onsets[1] - 1.5).abs() < 0.05);
        assert!((onsets[2] - 2.4).abs() < 0.05);
    }

    #[test]
    fn no_onsets_in_silence() {
        let buffer = AudioBuffer {
            samples: vec![0.0; 8000],
            sample_rate: 8000,
        };
        assert!(detect_onsets(&buffer).is_empty());
    }
}
