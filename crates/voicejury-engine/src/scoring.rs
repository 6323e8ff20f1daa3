//! Scoring algorithms
//!
//! Three independent 0–100 scores:
//! - pitch: DTW distance between the cents-space contours
//! - rhythm: onset alignment, with pitch-edge pseudo-onsets as fallback
//! - lyrics: word error rate against the reference text
//!
//! All three share the `max(0, 100 − Δ/2)` mapping where Δ is the average
//! cents difference (pitch) or the average timing error in ms (rhythm).

use tracing::{debug, warn};

use voicejury_core::{PitchContour, Result};

use crate::audio::AudioBuffer;

/// Neutral score used when a comparison has no signal to work with.
const NEUTRAL: f32 = 50.0;

/// Minimum voiced frames per side for a meaningful pitch comparison.
const MIN_VOICED_FRAMES: usize = 10;

/// DTW input length cap; longer cent sequences are stride-decimated.
const MAX_DTW_POINTS: usize = 1000;

/// Reference frequency for cents conversion (A4).
const CENTS_REFERENCE_HZ: f32 = 440.0;

// ── Pitch ────────────────────────────────────────────────────────────────

/// Pitch accuracy via cents-space DTW.
///
/// Both contours are restricted to their temporal overlap after shifting
/// the user by `offset_seconds` (positive = user runs behind). Under
/// [`MIN_VOICED_FRAMES`] voiced frames on either side, the comparison is
/// meaningless and the neutral score is returned.
pub fn pitch_accuracy(
    user: &PitchContour,
    reference: &PitchContour,
    offset_seconds: f64,
) -> f32 {
    let (user_cents, ref_cents) = overlapping_cents(user, reference, offset_seconds);

    if user_cents.len() < MIN_VOICED_FRAMES || ref_cents.len() < MIN_VOICED_FRAMES {
        debug!(
            user_voiced = user_cents.len(),
            ref_voiced = ref_cents.len(),
            "not enough voiced samples for pitch comparison"
        );
        return NEUTRAL;
    }

    let avg_distance = dtw_average_distance(&user_cents, &ref_cents);
    // 0 cents = 100, 100 cents (a semitone) = 50, 200 cents = 0
    let score = (100.0 - avg_distance / 2.0).max(0.0) as f32;
    debug!(
        avg_cents = format!("{:.1}", avg_distance),
        score = format!("{:.1}", score),
        "pitch dtw"
    );
    round1(score)
}

/// Voiced frames of both contours inside the shared window, as cents.
fn overlapping_cents(
    user: &PitchContour,
    reference: &PitchContour,
    offset_seconds: f64,
) -> (Vec<f32>, Vec<f32>) {
    let offset = offset_seconds as f32;
    // User frame at time t sings the reference's material at t − offset.
    let user_start = user.time.first().copied().unwrap_or(0.0) - offset;
    let user_end = user.time.last().copied().unwrap_or(0.0) - offset;
    let ref_start = reference.time.first().copied().unwrap_or(0.0);
    let ref_end = reference.time.last().copied().unwrap_or(0.0);
    let window = (user_start.max(ref_start), user_end.min(ref_end));

    let collect = |contour: &PitchContour, shift: f32| -> Vec<f32> {
        contour
            .time
            .iter()
            .zip(&contour.frequency)
            .filter(|(t, f)| {
                let aligned = **t - shift;
                **f > 0.0 && aligned >= window.0 && aligned <= window.1
            })
            .map(|(_, f)| cents(*f))
            .collect()
    };

    (collect(user, offset), collect(reference, 0.0))
}

fn cents(freq: f32) -> f32 {
    1200.0 * (freq / CENTS_REFERENCE_HZ).log2()
}

/// Exact DTW with Euclidean pointwise cost, normalised by path length.
/// Inputs are decimated to [`MAX_DTW_POINTS`] first to bound the matrix.
fn dtw_average_distance(a: &[f32], b: &[f32]) -> f64 {
    let a = decimate(a, MAX_DTW_POINTS);
    let b = decimate(b, MAX_DTW_POINTS);
    let (n, m) = (a.len(), b.len());

    let mut cost = vec![f64::INFINITY; (n + 1) * (m + 1)];
    let idx = |i: usize, j: usize| i * (m + 1) + j;
    cost[idx(0, 0)] = 0.0;

    for i in 1..=n {
        for j in 1..=m {
            let d = (a[i - 1] as f64 - b[j - 1] as f64).abs();
            let prev = cost[idx(i - 1, j - 1)]
                .min(cost[idx(i - 1, j)])
                .min(cost[idx(i, j - 1)]);
            cost[idx(i, j)] = d + prev;
        }
    }

    // Walk the optimal path back to count its length.
    let (mut i, mut j) = (n, m);
    let mut path_len = 1usize;
    while i > 1 || j > 1 {
        let diag = if i > 1 && j > 1 {
            cost[idx(i - 1, j - 1)]
        } else {
            f64::INFINITY
        };
        let up = if i > 1 { cost[idx(i - 1, j)] } else { f64::INFINITY };
        let left = if j > 1 { cost[idx(i, j - 1)] } else { f64::INFINITY };

        if diag <= up && diag <= left {
            i -= 1;
            j -= 1;
        } else if up <= left {
            i -= 1;
        } else {
            j -= 1;
        }
        path_len += 1;
    }

    cost[idx(n, m)] / path_len as f64
}

fn decimate(values: &[f32], max_points: usize) -> Vec<f32> {
    if values.len() <= max_points {
        return values.to_vec();
    }
    let stride = values.len().div_ceil(max_points);
    values.iter().step_by(stride).copied().collect()
}

// ── Rhythm ───────────────────────────────────────────────────────────────

/// Rhythm accuracy. Prefers onsets detected on the raw stems; falls back
/// to voiced/unvoiced rising edges of the contours when audio is missing
/// or one side has no detectable attacks.
pub fn rhythm_accuracy(
    user_audio: Option<&AudioBuffer>,
    ref_audio: Option<&AudioBuffer>,
    user_contour: &PitchContour,
    ref_contour: &PitchContour,
    offset_seconds: f64,
) -> f32 {
    if let (Some(user), Some(reference)) = (user_audio, ref_audio) {
        let user_onsets = crate::audio::detect_onsets(user);
        let ref_onsets = crate::audio::detect_onsets(reference);
        if !user_onsets.is_empty() && !ref_onsets.is_empty() {
            return onset_alignment_score(&user_onsets, &ref_onsets, offset_seconds);
        }
        debug!("no audio onsets, falling back to pitch-edge onsets");
    }

    let user_onsets = voice_onsets(user_contour);
    let ref_onsets = voice_onsets(ref_contour);
    if user_onsets.is_empty() || ref_onsets.is_empty() {
        debug!("no voice onsets detected for rhythm analysis");
        return NEUTRAL;
    }
    onset_alignment_score(&user_onsets, &ref_onsets, offset_seconds)
}

/// Rising unvoiced→voiced edges, as pseudo-onsets in seconds.
fn voice_onsets(contour: &PitchContour) -> Vec<f64> {
    let mut onsets = Vec::new();
    for i in 1..contour.frequency.len() {
        if contour.frequency[i] > 0.0 && contour.frequency[i - 1] <= 0.0 {
            onsets.push(contour.time[i] as f64);
        }
    }
    onsets
}

/// For each user onset (shifted by the offset), the distance to the
/// nearest reference onset; average error in ms maps onto the score curve.
fn onset_alignment_score(user_onsets: &[f64], ref_onsets: &[f64], offset_seconds: f64) -> f32 {
    let mut total_error_ms = 0.0f64;
    for onset in user_onsets {
        let aligned = onset - offset_seconds;
        let nearest = ref_onsets
            .iter()
            .map(|r| (r - aligned).abs())
            .fold(f64::INFINITY, f64::min);
        total_error_ms += nearest * 1000.0;
    }
    let avg_error_ms = total_error_ms / user_onsets.len() as f64;
    // 0 ms = 100, 100 ms = 50, 200 ms = off-beat = 0
    let score = (100.0 - avg_error_ms / 2.0).max(0.0) as f32;
    debug!(
        onsets = user_onsets.len(),
        avg_error_ms = format!("{:.1}", avg_error_ms),
        score = format!("{:.1}", score),
        "rhythm"
    );
    round1(score)
}

// ── Lyrics ───────────────────────────────────────────────────────────────

/// Lyrics accuracy via word error rate. Returns the score and an optional
/// user-facing warning.
pub fn lyrics_accuracy(user_lyrics: &str, reference_lyrics: &str) -> (f32, Option<String>) {
    let user = user_lyrics.to_lowercase();
    let user = user.trim();
    let reference = reference_lyrics.to_lowercase();
    let reference = reference.trim();

    if reference.is_empty() {
        return (
            NEUTRAL,
            Some("Paroles de référence introuvables — score paroles neutre".to_string()),
        );
    }
    if user.is_empty() {
        return (0.0, None);
    }

    let ref_words: Vec<&str> = reference.split_whitespace().collect();
    let user_words: Vec<&str> = user.split_whitespace().collect();

    match word_error_rate(&ref_words, &user_words) {
        Ok(wer) => {
            let score = ((1.0 - wer) * 100.0).max(0.0) as f32;
            debug!(wer = format!("{:.2}", wer), score = format!("{:.1}", score), "lyrics");
            (round1(score), None)
        }
        Err(e) => {
            warn!(error = %e, "wer computation failed, using word overlap");
            (overlap_score(&user_words, &ref_words), None)
        }
    }
}

/// WER = edit distance over words / reference word count.
fn word_error_rate(reference: &[&str], user: &[&str]) -> Result<f64> {
    if reference.is_empty() {
        return Err(voicejury_core::Error::Validation(
            "empty reference for WER".to_string(),
        ));
    }
    let (n, m) = (reference.len(), user.len());
    let mut prev: Vec<usize> = (0..=m).collect();
    let mut current = vec![0usize; m + 1];

    for i in 1..=n {
        current[0] = i;
        for j in 1..=m {
            let substitution = prev[j - 1] + usize::from(reference[i - 1] != user[j - 1]);
            current[j] = substitution.min(prev[j] + 1).min(current[j - 1] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }

    Ok(prev[m] as f64 / n as f64)
}

/// Fallback: fraction of reference words the user hit, capped at 100.
fn overlap_score(user_words: &[&str], ref_words: &[&str]) -> f32 {
    if ref_words.is_empty() {
        return NEUTRAL;
    }
    let ref_set: std::collections::HashSet<&str> = ref_words.iter().copied().collect();
    let user_set: std::collections::HashSet<&str> = user_words.iter().copied().collect();
    let overlap = ref_set.intersection(&user_set).count();
    round1(((overlap as f32 / ref_set.len() as f32) * 100.0).min(100.0))
}

fn round1(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}
