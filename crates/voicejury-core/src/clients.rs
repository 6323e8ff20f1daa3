//! Inference client traits
//!
//! Pipelines receive these as interface-typed dependencies instead of
//! reaching for process-wide singletons, so tests substitute fakes without
//! any patching. Concrete HTTP implementations live in
//! `voicejury-inference`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::contour::PitchContour;
use crate::types::{JudgeComment, LyricsRecord, ScoreSummary, Transcription};
use crate::Result;

/// Where a recording to be separated comes from.
#[derive(Debug, Clone)]
pub enum SeparationInput {
    LocalFile(PathBuf),
    RemoteUrl(String),
}

/// The two stems produced by source separation, staged on local disk.
#[derive(Debug, Clone)]
pub struct StemPair {
    pub vocals: PathBuf,
    pub instrumentals: PathBuf,
}

/// Source separation (heavy GPU). Output stems are 44.1 kHz stereo WAV.
///
/// Failure classes: [`crate::Error::GpuUnavailable`] is retryable,
/// [`crate::Error::CorruptAudio`] is fatal.
#[async_trait]
pub trait SeparationClient: Send + Sync {
    async fn separate(&self, input: &SeparationInput, workdir: &Path) -> Result<StemPair>;
}

/// Model size for pitch extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PitchMode {
    /// Tiny model — reference preparation, throughput over precision.
    Fast,
    /// Full model — user performances.
    Accurate,
}

impl PitchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PitchMode::Fast => "fast",
            PitchMode::Accurate => "accurate",
        }
    }
}

/// Pitch extraction (dedicated GPU, no co-tenant coordination needed).
#[async_trait]
pub trait PitchClient: Send + Sync {
    async fn extract(&self, vocals: &Path, mode: PitchMode) -> Result<PitchContour>;
}

/// Speech-to-text result, tagged with the tier that produced it so caches
/// and result metadata can record provenance.
#[derive(Debug, Clone)]
pub struct SttOutcome {
    pub transcription: Transcription,
    /// e.g. `whisper_timestamped` (shared service), `groq_whisper`
    /// (public API tier), `whisper_local`.
    pub provenance: String,
}

/// Speech-to-text over a vocals stem.
///
/// Implementations are tiered; the contract is a single call that either
/// returns a transcription or an error the pipeline may retry.
#[async_trait]
pub trait SttClient: Send + Sync {
    async fn transcribe(
        &self,
        vocals: &Path,
        language: &str,
        prompt: Option<&str>,
    ) -> Result<SttOutcome>;
}

/// Lyrics lookup query.
#[derive(Debug, Clone)]
pub struct LyricsQuery {
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub duration_sec: Option<u32>,
}

/// Lyrics lookup across providers. A miss on every provider returns
/// [`crate::Error::NotFound`]; callers cache the negative result.
#[async_trait]
pub trait LyricsClient: Send + Sync {
    async fn lookup(&self, query: &LyricsQuery) -> Result<LyricsRecord>;
}

/// Jury persona descriptor.
#[derive(Debug, Clone)]
pub struct Persona {
    pub name: String,
    /// Style instruction injected into the generation prompt.
    pub style: String,
    /// Minimum overall score for a "yes" vote.
    pub yes_threshold: u8,
}

/// The three jury personas and their voting thresholds.
pub fn default_personas() -> Vec<Persona> {
    vec![
        Persona {
            name: "Le Cassant".to_string(),
            style: "impitoyable mais juste, utilise des métaphores drôles et cinglantes"
                .to_string(),
            yes_threshold: 70,
        },
        Persona {
            name: "L'Encourageant".to_string(),
            style: "bienveillant, trouve toujours du positif même dans les pires performances"
                .to_string(),
            yes_threshold: 40,
        },
        Persona {
            name: "Le Technique".to_string(),
            style: "précis et analytique, parle de technique vocale".to_string(),
            yes_threshold: 55,
        },
    ]
}

/// Judge commentary generation. Never fails: the last tier is a heuristic.
#[async_trait]
pub trait JudgeClient: Send + Sync {
    async fn comment(
        &self,
        persona: &Persona,
        scores: &ScoreSummary,
        track_title: &str,
    ) -> JudgeComment;
}

/// External audio extractor: pulls the audio track of a source video into a
/// local file in a lossless compressed container.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Returns the path of the downloaded audio (extension reflects the
    /// container actually produced).
    async fn download_audio(&self, source_url: &str, dest_dir: &Path) -> Result<PathBuf>;
}

/// Advisory coordinator for the GPU shared with a co-tenant LLM server.
///
/// `request_exclusive` is best-effort and always returns: `true` when the
/// co-tenant acknowledged the unload, `false` otherwise. Callers consult
/// the answer only to pick a smaller batch — never to block.
#[async_trait]
pub trait GpuGate: Send + Sync {
    async fn request_exclusive(&self) -> bool;
}
