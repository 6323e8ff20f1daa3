//! VoiceJury core types and trait seams
//!
//! Shared vocabulary of the analysis orchestration engine: the error
//! taxonomy, the session record and score bundle, the pitch contour
//! artifact, deterministic blob path derivation, and the traits the
//! pipelines depend on (session store, inference clients, GPU gate).

pub mod clients;
pub mod contour;
pub mod error;
pub mod paths;
pub mod session_store;
pub mod sweep;
pub mod types;

pub use contour::PitchContour;
pub use error::{Error, Result};
pub use session_store::SessionStore;
pub use types::{
    JudgeComment, LyricsLine, LyricsRecord, ProgressMarker, ReferenceStatus, ScoreBundle,
    ScoreSummary, SessionPatch, SessionRecord, SessionStatus, SyncQuality, SyncRecord,
    Transcription, Vote, Word,
};
