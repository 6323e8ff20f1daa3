//! Envelope cross-correlation sync
//!
//! Measures the temporal offset between the user performance and the
//! reference by correlating their amplitude envelopes. Replaces manual
//! offset guessing; the result feeds pitch/rhythm scoring and is included
//! verbatim in the final bundle.
//!
//! CPU-only: both signals are reduced to 8 kHz mono, rectified into 50 ms
//! moving-average envelopes, decimated to an 80 Hz grid and correlated
//! over a ±30 s lag window.

use std::path::Path;
use tracing::{info, warn};

use voicejury_core::{Result, SyncRecord};

use crate::audio::{load_wav_mono, moving_average_envelope, resample, standardize};

/// Offsets below this confidence are reported but not applied to scoring.
pub const MIN_OFFSET_CONFIDENCE: f64 = 0.3;

/// Search window around zero lag.
pub const MAX_OFFSET_SECONDS: f64 = 30.0;

const TARGET_SAMPLE_RATE: u32 = 8000;
const ENVELOPE_WINDOW: usize = 400; // 50 ms at 8 kHz
const DECIMATE: usize = 100; // envelope grid: 8000 / 100 = 80 Hz

pub fn compute_sync_offset(user_vocals: &Path, ref_vocals: &Path) -> Result<SyncRecord> {
    let user = envelope_grid(user_vocals)?;
    let reference = envelope_grid(ref_vocals)?;

    let (Some(user), Some(reference)) = (
        standardize(&user),
        standardize(&reference),
    ) else {
        warn!("one of the signals is near-silent, cannot sync");
        return Ok(no_sync());
    };

    let grid_rate = TARGET_SAMPLE_RATE as f64 / DECIMATE as f64;
    let max_lag = (MAX_OFFSET_SECONDS * grid_rate) as i64;

    // corr[lag] = Σ user[i] · ref[i − lag]; positive lag means the user
    // runs behind the reference.
    let mut best_lag = 0i64;
    let mut best_value = f64::MIN;
    let mut abs_sum = 0.0f64;
    let mut lag_count = 0u64;
    for lag in -max_lag..=max_lag {
        let mut acc = 0.0f64;
        for (i, u) in user.iter().enumerate() {
            let j = i as i64 - lag;
            if j >= 0 && (j as usize) < reference.len() {
                acc += *u as f64 * reference[j as usize] as f64;
            }
        }
        abs_sum += acc.abs();
        lag_count += 1;
        if acc > best_value {
            best_value = acc;
            best_lag = lag;
        }
    }

    let mean_abs = abs_sum / lag_count as f64;
    let raw_confidence = best_value / (mean_abs + 1e-8);
    // Empirically a 5× peak-to-mean ratio is fully confident.
    let confidence = ((raw_confidence - 1.0) / 4.0).clamp(0.0, 1.0);
    let offset_seconds = best_lag as f64 / grid_rate;

    info!(
        offset_seconds = format!("{:.3}", offset_seconds),
        confidence = format!("{:.2}", confidence),
        raw = format!("{:.1}", raw_confidence),
        "cross-correlation sync"
    );

    Ok(SyncRecord {
        offset_seconds: (offset_seconds * 1000.0).round() / 1000.0,
        confidence: (confidence * 1000.0).round() / 1000.0,
        method: "cross_correlation".to_string(),
    })
}

/// 80 Hz rectified envelope of a vocals file.
fn envelope_grid(path: &Path) -> Result<Vec<f32>> {
    let buffer = load_wav_mono(path)?;
    let buffer = resample(&buffer, TARGET_SAMPLE_RATE);
    let envelope = moving_average_envelope(&buffer.samples, ENVELOPE_WINDOW);
    Ok(envelope.iter().step_by(DECIMATE).copied().collect())
}

fn no_sync() -> SyncRecord {
    SyncRecord {
        offset_seconds: 0.0,
        confidence: 0.0,
        method: "cross_correlation".to_string(),
    }
}

/// Offset the scorers should apply: the measured one when the correlation
/// is trustworthy, zero otherwise. The raw record is reported either way.
pub fn effective_offset(record: &SyncRecord) -> f64 {
    if record.confidence > MIN_OFFSET_CONFIDENCE {
        record.offset_seconds
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::test_support::write_burst_wav;

    /// Irregular burst pattern so the correlation has one sharp peak.
    const PATTERN: [(f64, f64, f64); 5] = [
        (0.4, 0.3, 440.0),
        (1.1, 0.2, 520.0),
        (2.3, 0.4, 390.0),
        (3.1, 0.25, 600.0),
        (4.6, 0.35, 450.0),
    ];

    #[test]
    fn self_correlation_is_zero_offset_high_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocals.wav");
        write_burst_wav(&path, 8000, 6.0, &PATTERN);

        let record = compute_sync_offset(&path, &path).unwrap();
        assert_eq!(record.method, "cross_correlation");
        // Offset 0 ± one envelope window
        assert!(record.offset_seconds.abs() <= 0.05);
        assert!(record.confidence >= 0.9);
    }

    #[test]
    fn detects_a_known_shift() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("ref.wav");
        let user = dir.path().join("user.wav");
        write_burst_wav(&reference, 8000, 8.0, &PATTERN);
        // Same pattern delayed by 1.5 s: the user runs behind
        let shifted: Vec<(f64, f64, f64)> =
            PATTERN.iter().map(|&(s, d, f)| (s + 1.5, d, f)).collect();
        write_burst_wav(&user, 8000, 8.0, &shifted);

        let record = compute_sync_offset(&user, &reference).unwrap();
        assert!(
            (record.offset_seconds - 1.5).abs() < 0.1,
            "offset {} not near 1.5",
            record.offset_seconds
        );
        assert!(record.confidence > MIN_OFFSET_CONFIDENCE);
    }

    #[test]
    fn silence_reports_zero_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let silent = dir.path().join("silent.wav");
        let voiced = dir.path().join("voiced.wav");
        write_burst_wav(&silent, 8000, 3.0, &[]);
        write_burst_wav(&voiced, 8000, 3.0, &[(0.5, 1.0, 440.0)]);

        let record = compute_sync_offset(&silent, &voiced).unwrap();
        assert_eq!(record.offset_seconds, 0.0);
        assert_eq!(record.confidence, 0.0);
    }

    #[test]
    fn low_confidence_offsets_are_not_applied() {
        let doubtful = SyncRecord {
            offset_seconds: 4.2,
            confidence: 0.2,
            method: "cross_correlation".to_string(),
        };
        assert_eq!(effective_offset(&doubtful), 0.0);

        let trusted = SyncRecord {
            offset_seconds: 1.5,
            confidence: 0.8,
            method: "cross_correlation".to_string(),
        };
        assert_eq!(effective_offset(&trusted), 1.5);

        // Exactly at the threshold stays unapplied
        let borderline = SyncRecord {
            offset_seconds: 2.0,
            confidence: MIN_OFFSET_CONFIDENCE,
            method: "cross_correlation".to_string(),
        };
        assert_eq!(effective_offset(&borderline), 0.0);
    }
}
