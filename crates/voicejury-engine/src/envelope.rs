//! Flow envelope
//!
//! Compact amplitude time-series of the reference vocals: 20 Hz, 50 ms RMS
//! windows, normalised to [0, 1]. The client renders it as a breathing
//! waveform while the reference plays. CPU-only, well under a second for a
//! full song.

use serde::{Deserialize, Serialize};
use std::path::Path;

use voicejury_core::Result;

use crate::audio::{load_wav_mono, moving_average_envelope, resample};

const TARGET_SAMPLE_RATE: u32 = 8000;
const WINDOW_MS: u32 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEnvelope {
    pub sample_rate_hz: u32,
    pub values: Vec<f32>,
    pub duration_seconds: f64,
}

/// Compute the flow envelope of a vocals file.
pub fn compute_flow_envelope(vocals: &Path) -> Result<FlowEnvelope> {
    let buffer = load_wav_mono(vocals)?;
    let buffer = resample(&buffer, TARGET_SAMPLE_RATE);

    let window = ((TARGET_SAMPLE_RATE * WINDOW_MS / 1000) as usize).max(1);
    let envelope = moving_average_envelope(&buffer.samples, window);

    // One value per window: 8000 / 400 = 20 Hz
    let mut values: Vec<f32> = envelope.iter().step_by(window).copied().collect();

    let peak = values.iter().copied().fold(0.0f32, f32::max);
    if peak > 1e-8 {
        for v in &mut values {
            *v = (*v / peak * 10_000.0).round() / 10_000.0;
        }
    } else {
        tracing::warn!(vocals = %vocals.display(), "near-silent vocals, envelope is flat");
    }

    Ok(FlowEnvelope {
        sample_rate_hz: TARGET_SAMPLE_RATE / window as u32,
        values,
        duration_seconds: (buffer.duration_seconds() * 100.0).round() / 100.0,
    })
}
