//! Domain types shared across the workspace
//!
//! The session record replaces the untyped mapping the original service kept
//! in its KV store: every recognised field is named, and partial updates go
//! through [`SessionPatch`] so the store can apply them atomically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall session lifecycle state.
///
/// Transitions are monotonic:
/// `created → recording_uploaded → analyzing → (completed | error)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    RecordingUploaded,
    Analyzing,
    Completed,
    Error,
}

/// Reference preparation state, tracked separately from the session status
/// because preparation runs in the background from the moment the session
/// is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceStatus {
    Pending,
    Downloading,
    Ready,
    Error,
}

/// Short-lived session record. Expires 3 hours after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub track_id: String,
    pub track_name: String,
    pub artist_name: String,
    pub duration_ms: Option<u64>,
    /// Reference-video fingerprint, once a source video has been chosen.
    pub reference_id: Option<String>,
    pub reference_status: ReferenceStatus,
    pub status: SessionStatus,
    /// Path or URL of the user upload.
    pub user_recording: Option<String>,
    /// Path or URL of the reference original.
    pub reference_recording: Option<String>,
    /// Id of the running analysis task, if any.
    pub analysis_task_id: Option<String>,
    pub result: Option<ScoreBundle>,
    pub created_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>, track_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            track_id: track_id.into(),
            track_name: String::new(),
            artist_name: String::new(),
            duration_ms: None,
            reference_id: None,
            reference_status: ReferenceStatus::Pending,
            status: SessionStatus::Created,
            user_recording: None,
            reference_recording: None,
            analysis_task_id: None,
            result: None,
            created_at: Utc::now(),
            error: None,
        }
    }
}

/// Field-wise overlay applied by [`crate::session_store::SessionStore::merge`].
///
/// `None` leaves the current value untouched; `Some` overwrites it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionPatch {
    pub reference_id: Option<String>,
    pub reference_status: Option<ReferenceStatus>,
    pub status: Option<SessionStatus>,
    pub user_recording: Option<String>,
    pub reference_recording: Option<String>,
    pub analysis_task_id: Option<String>,
    pub result: Option<ScoreBundle>,
    pub error: Option<String>,
}

impl SessionPatch {
    /// Apply this overlay to a record in place.
    pub fn apply(&self, record: &mut SessionRecord) {
        if let Some(v) = &self.reference_id {
            record.reference_id = Some(v.clone());
        }
        if let Some(v) = self.reference_status {
            record.reference_status = v;
        }
        if let Some(v) = self.status {
            record.status = v;
        }
        if let Some(v) = &self.user_recording {
            record.user_recording = Some(v.clone());
        }
        if let Some(v) = &self.reference_recording {
            record.reference_recording = Some(v.clone());
        }
        if let Some(v) = &self.analysis_task_id {
            record.analysis_task_id = Some(v.clone());
        }
        if let Some(v) = &self.result {
            record.result = Some(v.clone());
        }
        if let Some(v) = &self.error {
            record.error = Some(v.clone());
        }
    }
}

/// Jury vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Yes,
    No,
}

/// One jury member's verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeComment {
    pub persona: String,
    pub comment: String,
    pub vote: Vote,
    pub model: String,
    pub latency_ms: u64,
}

/// Outcome of the envelope cross-correlation between user and reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecord {
    pub offset_seconds: f64,
    /// 0–1, peak-to-mean ratio of the correlation renormalised so a 5×
    /// ratio is fully confident.
    pub confidence: f64,
    pub method: String,
}

/// Final result of the analysis pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBundle {
    pub session_id: String,
    /// Aggregate score, `round(0.4·pitch + 0.3·rhythm + 0.3·lyrics)`.
    pub score: u8,
    pub pitch_accuracy: f32,
    pub rhythm_accuracy: f32,
    pub lyrics_accuracy: f32,
    pub warnings: Vec<String>,
    pub jury_comments: Vec<JudgeComment>,
    pub auto_sync: SyncRecord,
}

/// Compact view of the scores handed to judge generation.
#[derive(Debug, Clone, Copy)]
pub struct ScoreSummary {
    pub overall: u8,
    pub pitch: f32,
    pub rhythm: f32,
    pub lyrics: f32,
}

/// Aggregate the three component scores into the final 0–100 verdict.
pub fn aggregate_score(pitch: f32, rhythm: f32, lyrics: f32) -> u8 {
    let weighted = pitch * 0.4 + rhythm * 0.3 + lyrics * 0.3;
    weighted.round().clamp(0.0, 100.0) as u8
}

/// One transcribed word with millisecond timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Word {
    pub word: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub confidence: f32,
}

/// Speech-to-text output: plain text plus word-level timestamps.
///
/// Word starts are strictly monotonic and `end_ms >= start_ms` per word.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub language: String,
    pub words: Vec<Word>,
}

impl Transcription {
    pub fn empty(language: &str) -> Self {
        Self {
            text: String::new(),
            language: language.to_string(),
            words: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// How well a lyrics record is aligned to the audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncQuality {
    Synced,
    Unsynced,
    None,
}

/// One timed lyrics line (synced providers only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LyricsLine {
    pub text: String,
    pub start_ms: u64,
    pub end_ms: Option<u64>,
}

/// Lyrics lookup result, tagged with provenance so the cache can assign
/// the right TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LyricsRecord {
    pub text: String,
    pub lines: Option<Vec<LyricsLine>>,
    pub sync_quality: SyncQuality,
    pub provenance: String,
    pub source_url: Option<String>,
}

impl LyricsRecord {
    /// A cached "looked everywhere, found nothing" marker.
    pub fn not_found() -> Self {
        Self {
            text: String::new(),
            lines: None,
            sync_quality: SyncQuality::None,
            provenance: "none".to_string(),
            source_url: None,
        }
    }

    pub fn has_lyrics(&self) -> bool {
        !self.text.trim().is_empty() || self.lines.as_ref().is_some_and(|l| !l.is_empty())
    }
}

/// Pipeline progress marker, written into the task state where the event
/// stream observes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressMarker {
    pub step: String,
    pub progress: u8,
    pub detail: String,
}

impl ProgressMarker {
    pub fn new(step: &str, progress: u8, detail: &str) -> Self {
        Self {
            step: step.to_string(),
            progress,
            detail: detail.to_string(),
        }
    }
}
