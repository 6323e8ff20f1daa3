//! Performance analysis pipeline
//!
//! Consumes a session id, produces its score bundle.
//!
//! Phase 1 runs the heavy separation sequentially; phase 2 fans out four
//! ways (user stem publishing, reference stems, user pitch, STT+lyrics);
//! phase 3 fans out two ways (envelope sync, reference pitch); phase 4
//! computes scores and runs the three judges in parallel.
//!
//! B and C are critical: their failure marks the session in error and
//! re-raises. A and D are not: A is logged and forgotten, D degrades to an
//! empty transcription with a "no lyrics" warning. Progress markers are
//! written only here, by the coordinating code — never from inside the
//! fan-out branches.

use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use voicejury_cache::{CachedWordTimestamps, LyricsCache, WordTimestampsCache};
use voicejury_core::clients::{
    GpuGate, JudgeClient, LyricsClient, LyricsQuery, Persona, PitchClient, PitchMode,
    SeparationClient, SeparationInput, SttClient, SttOutcome, StemPair,
};
use voicejury_core::types::aggregate_score;
use voicejury_core::{
    Error, LyricsRecord, PitchContour, Result, ScoreBundle, ScoreSummary, SessionPatch,
    SessionRecord, SessionStatus, SessionStore, SyncRecord, Transcription, paths,
};
use voicejury_storage::BlobStore;

use crate::audio::load_wav_mono;
use crate::queue::ProgressSink;
use crate::scoring::{lyrics_accuracy, pitch_accuracy, rhythm_accuracy};
use crate::sync::{compute_sync_offset, effective_offset};

/// TTL of the user-tracks ready-key.
const READY_KEY_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub language: String,
    /// Budget for critical phase-2 branches (B, C).
    pub critical_timeout: Duration,
    /// Budget for non-critical branches (A, D).
    pub noncritical_timeout: Duration,
    /// STT attempts on transient failure.
    pub stt_attempts: u32,
    /// Jittered backoff range between STT attempts.
    pub stt_backoff_min: Duration,
    pub stt_backoff_max: Duration,
    pub temp_root: PathBuf,
    pub personas: Vec<Persona>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            language: "fr".to_string(),
            critical_timeout: Duration::from_secs(300),
            noncritical_timeout: Duration::from_secs(120),
            stt_attempts: 3,
            stt_backoff_min: Duration::from_secs(30),
            stt_backoff_max: Duration::from_secs(120),
            temp_root: PathBuf::from("/tmp/voicejury"),
            personas: voicejury_core::clients::default_personas(),
        }
    }
}

pub struct AnalysisPipeline {
    pub storage: Arc<BlobStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub separation: Arc<dyn SeparationClient>,
    pub pitch: Arc<dyn PitchClient>,
    pub stt: Arc<dyn SttClient>,
    pub lyrics: Arc<dyn LyricsClient>,
    pub judge: Arc<dyn JudgeClient>,
    pub gpu: Arc<dyn GpuGate>,
    pub lyrics_cache: Arc<LyricsCache>,
    pub word_timestamps: Arc<WordTimestampsCache>,
    pub config: AnalysisConfig,
}

/// Everything branch D produces, with graceful fallbacks baked in.
struct VocalContent {
    transcription: Transcription,
    stt_provenance: Option<String>,
    lyrics: LyricsRecord,
    warnings: Vec<String>,
}

impl AnalysisPipeline {
    /// Run the full pipeline for a session. On failure the session is
    /// marked in error before the error propagates.
    pub async fn analyze_performance(
        &self,
        session_id: &str,
        sink: &ProgressSink,
    ) -> Result<ScoreBundle> {
        let workdir = self.config.temp_root.join(format!("analysis-{}", session_id));
        let result = self.run(session_id, sink, &workdir).await;

        // GPU staging is removed on every exit path.
        if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(workdir = %workdir.display(), error = %e, "failed to remove staging dir");
            }
        }

        match result {
            Ok(bundle) => {
                self.sessions
                    .merge(
                        session_id,
                        SessionPatch {
                            status: Some(SessionStatus::Completed),
                            result: Some(bundle.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok(bundle)
            }
            Err(e) => {
                warn!(session_id, error = %e, "analysis failed");
                let _ = self
                    .sessions
                    .merge(
                        session_id,
                        SessionPatch {
                            status: Some(SessionStatus::Error),
                            error: Some(e.to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        session_id: &str,
        sink: &ProgressSink,
        workdir: &Path,
    ) -> Result<ScoreBundle> {
        let session = self
            .sessions
            .read(session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;
        let user_recording = session
            .user_recording
            .clone()
            .ok_or_else(|| Error::Validation("user recording not uploaded".to_string()))?;
        let ref_id = session
            .reference_id
            .clone()
            .ok_or_else(|| Error::Validation("reference not chosen yet".to_string()))?;

        tokio::fs::create_dir_all(workdir).await?;

        // ── Phase 1: sequential, heavy GPU ──────────────────────────────
        sink.update("loading_model", 5, "Chargement du modèle de séparation...");
        let original = workdir.join(original_file_name(&user_recording));
        self.storage.get_to_file(&user_recording, &original).await?;

        sink.update("separating_user", 10, "Isolation de ta voix...");
        self.gpu.request_exclusive().await;
        let user_stems = self
            .separation
            .separate(&SeparationInput::LocalFile(original), &workdir.join("user"))
            .await?;
        sink.update("separating_user_done", 20, "Voix isolée !");

        // ── Phase 2: four-way fan-out ───────────────────────────────────
        sink.update("separating_reference", 30, "Préparation de la référence...");

        let branch_a = timeout(
            self.config.noncritical_timeout,
            self.publish_user_stems(session_id, &user_stems),
        );
        let branch_b = timeout(
            self.config.critical_timeout,
            self.reference_vocals(&session, &ref_id, workdir),
        );
        let branch_c = timeout(
            self.config.critical_timeout,
            self.pitch.extract(&user_stems.vocals, PitchMode::Accurate),
        );
        let branch_d = timeout(
            self.config.noncritical_timeout,
            self.vocal_content(&session, &user_stems.vocals),
        );

        let (a, b, c, d) = tokio::join!(branch_a, branch_b, branch_c, branch_d);

        // A is best-effort
        match a {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(session_id, error = %e, "user stem publishing failed"),
            Err(_) => warn!(session_id, "user stem publishing timed out"),
        }
        // B and C are critical
        let ref_vocals = b
            .map_err(|_| Error::UpstreamUnavailable("reference preparation timed out".to_string()))??;
        let user_contour = c
            .map_err(|_| Error::UpstreamUnavailable("user pitch extraction timed out".to_string()))??;
        // D degrades
        let content = match d {
            Ok(content) => content,
            Err(_) => {
                warn!(session_id, "transcription branch timed out");
                VocalContent {
                    transcription: Transcription::empty(&self.config.language),
                    stt_provenance: None,
                    lyrics: LyricsRecord::not_found(),
                    warnings: vec!["Transcription indisponible".to_string()],
                }
            }
        };

        // ── Phase 3: two-way fan-out ────────────────────────────────────
        sink.update("computing_sync", 60, "Synchronisation des pistes...");

        let user_vocals_path = user_stems.vocals.clone();
        let ref_vocals_path = ref_vocals.clone();
        let sync_task = tokio::task::spawn_blocking(move || {
            compute_sync_offset(&user_vocals_path, &ref_vocals_path)
        });
        let ref_pitch_task = self.reference_pitch(&ref_id, &ref_vocals);

        let (sync_result, ref_contour) = tokio::join!(sync_task, ref_pitch_task);
        let auto_sync = match sync_result {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => {
                warn!(session_id, error = %e, "sync computation failed");
                SyncRecord {
                    offset_seconds: 0.0,
                    confidence: 0.0,
                    method: "cross_correlation".to_string(),
                }
            }
            Err(e) => return Err(Error::Fatal(format!("sync task: {}", e))),
        };
        let ref_contour = ref_contour?;

        // ── Phase 4: scores, then the jury ──────────────────────────────
        sink.update("calculating_scores", 80, "Calcul des scores...");
        let offset = effective_offset(&auto_sync);
        let (pitch_score, rhythm_score, lyrics_score, mut warnings) = {
            let user_vocals = user_stems.vocals.clone();
            let ref_vocals = ref_vocals.clone();
            let user_contour = user_contour.clone();
            let ref_contour = ref_contour.clone();
            let user_text = content.transcription.text.clone();
            let ref_text = content.lyrics.text.clone();
            tokio::task::spawn_blocking(move || {
                compute_component_scores(
                    &user_vocals,
                    &ref_vocals,
                    &user_contour,
                    &ref_contour,
                    &user_text,
                    &ref_text,
                    offset,
                )
            })
            .await
            .map_err(|e| Error::Fatal(format!("scoring task: {}", e)))?
        };
        warnings.extend(content.warnings);

        let overall = aggregate_score(pitch_score, rhythm_score, lyrics_score);
        info!(
            session_id,
            pitch = pitch_score,
            rhythm = rhythm_score,
            lyrics = lyrics_score,
            overall,
            "scores computed"
        );

        sink.update("jury_deliberation", 85, "Le jury se réunit...");
        let summary = ScoreSummary {
            overall,
            pitch: pitch_score,
            rhythm: rhythm_score,
            lyrics: lyrics_score,
        };
        let jury_comments = futures::future::join_all(
            self.config
                .personas
                .iter()
                .map(|persona| self.judge.comment(persona, &summary, &session.track_name)),
        )
        .await;

        sink.update("jury_voting", 95, "Le jury vote...");
        let bundle = ScoreBundle {
            session_id: session_id.to_string(),
            score: overall,
            pitch_accuracy: pitch_score,
            rhythm_accuracy: rhythm_score,
            lyrics_accuracy: lyrics_score,
            warnings,
            jury_comments,
            auto_sync,
        };

        // Record provenance-tagged word timestamps while we hold them.
        if let Some(provenance) = &content.stt_provenance {
            let entry = CachedWordTimestamps {
                track_id: session.track_id.clone(),
                video_id: Some(ref_id.clone()),
                text: content.transcription.text.clone(),
                words: content.transcription.words.clone(),
                provenance: provenance.clone(),
                model_version: None,
                quality: mean_confidence(&content.transcription),
                created_at: chrono::Utc::now(),
            };
            if let Err(e) = self.word_timestamps.set(&entry).await {
                warn!(session_id, error = %e, "word timestamps cache write failed");
            }
        }

        sink.update("completed", 100, "Verdict rendu !");
        Ok(bundle)
    }

    /// Branch A: session-scoped copies of the user stems plus the
    /// dedicated ready-key, so the client can play the separated tracks
    /// before the verdict exists.
    async fn publish_user_stems(&self, session_id: &str, stems: &StemPair) -> Result<()> {
        self.storage
            .put_file(&stems.vocals, &paths::user_vocals(session_id), "audio/wav")
            .await?;
        self.storage
            .put_file(
                &stems.instrumentals,
                &paths::user_instrumentals(session_id),
                "audio/wav",
            )
            .await?;
        self.sessions
            .set_key(
                &paths::user_tracks_ready_key(session_id),
                chrono::Utc::now().timestamp().to_string(),
                READY_KEY_TTL,
            )
            .await?;
        Ok(())
    }

    /// Branch B: a local copy of the reference vocals — from the
    /// fingerprint cache when warm, via separation otherwise.
    async fn reference_vocals(
        &self,
        session: &SessionRecord,
        ref_id: &str,
        workdir: &Path,
    ) -> Result<PathBuf> {
        let cached_key = paths::reference_vocals(ref_id);
        let dest = workdir.join("ref").join("vocals.wav");

        if self.storage.exists(&cached_key).await {
            self.storage.get_to_file(&cached_key, &dest).await?;
            return Ok(dest);
        }

        let reference_recording = session
            .reference_recording
            .clone()
            .ok_or_else(|| Error::Validation("reference recording unavailable".to_string()))?;

        self.gpu.request_exclusive().await;
        let stems = self
            .separation
            .separate(
                &SeparationInput::RemoteUrl(self.storage.public_url(&reference_recording)),
                &workdir.join("ref"),
            )
            .await?;

        for (local, key) in [
            (&stems.vocals, paths::reference_vocals(ref_id)),
            (&stems.instrumentals, paths::reference_instrumentals(ref_id)),
        ] {
            if let Err(e) = self.storage.put_file(local, &key, "audio/wav").await {
                warn!(ref_id, key, error = %e, "reference stem upload failed");
            }
        }
        Ok(stems.vocals)
    }

    /// Branch D: lyrics lookup (cache first, negative results cached too),
    /// then STT with the lyrics as a recognition hint. Never fails — the
    /// caller substitutes defaults on timeout, this substitutes them on
    /// error.
    async fn vocal_content(&self, session: &SessionRecord, user_vocals: &Path) -> VocalContent {
        let mut warnings = Vec::new();

        let lyrics = match self.fetch_lyrics(session).await {
            Ok(record) => record,
            Err(e) => {
                warn!(track_id = %session.track_id, error = %e, "lyrics lookup failed");
                LyricsRecord::not_found()
            }
        };
        if !lyrics.has_lyrics() {
            warnings.push("Paroles officielles introuvables".to_string());
        }

        let prompt = lyrics.has_lyrics().then(|| truncate(&lyrics.text, 200));
        let (transcription, stt_provenance) = match self
            .transcribe_with_retry(user_vocals, prompt.as_deref())
            .await
        {
            Ok(SttOutcome {
                transcription,
                provenance,
            }) => (transcription, Some(provenance)),
            Err(e) => {
                warn!(error = %e, "all transcription attempts failed");
                warnings.push("Transcription indisponible".to_string());
                (Transcription::empty(&self.config.language), None)
            }
        };

        VocalContent {
            transcription,
            stt_provenance,
            lyrics,
            warnings,
        }
    }

    async fn fetch_lyrics(&self, session: &SessionRecord) -> Result<LyricsRecord> {
        if let Some(hit) = self.lyrics_cache.get(&session.track_id).await? {
            return Ok(hit.record);
        }

        let query = LyricsQuery {
            artist: session.artist_name.clone(),
            title: session.track_name.clone(),
            album: None,
            duration_sec: session.duration_ms.map(|ms| (ms / 1000) as u32),
        };
        let record = match self.lyrics.lookup(&query).await {
            Ok(record) => record,
            Err(Error::NotFound(_)) => LyricsRecord::not_found(),
            Err(e) => return Err(e),
        };

        if let Err(e) = self
            .lyrics_cache
            .set(
                &session.track_id,
                &record,
                Some(&session.artist_name),
                Some(&session.track_name),
            )
            .await
        {
            warn!(track_id = %session.track_id, error = %e, "lyrics cache write failed");
        }
        Ok(record)
    }

    async fn transcribe_with_retry(
        &self,
        vocals: &Path,
        prompt: Option<&str>,
    ) -> Result<SttOutcome> {
        let mut last_err = None;
        for attempt in 0..self.config.stt_attempts.max(1) {
            if attempt > 0 {
                let min = self.config.stt_backoff_min.as_secs_f64();
                let max = self.config.stt_backoff_max.as_secs_f64().max(min);
                let jittered = rand::rng().random_range(min..=max);
                warn!(
                    attempt,
                    backoff_s = format!("{:.0}", jittered),
                    "retrying transcription"
                );
                tokio::time::sleep(Duration::from_secs_f64(jittered)).await;
            }
            match self
                .stt
                .transcribe(vocals, &self.config.language, prompt)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_err
            .unwrap_or_else(|| Error::Fatal("transcription retry loop exhausted".to_string())))
    }

    /// Branch F: reference pitch from the fingerprint cache, validated;
    /// recomputed in fast mode on miss or corruption.
    async fn reference_pitch(&self, ref_id: &str, ref_vocals: &Path) -> Result<PitchContour> {
        match self.storage.get(&paths::reference_pitch(ref_id)).await {
            Ok(bytes) => match PitchContour::from_npz_bytes(&bytes) {
                Ok(contour) => return Ok(contour),
                Err(e) => {
                    warn!(ref_id, error = %e, "cached reference pitch is corrupt, recomputing")
                }
            },
            Err(Error::NotFound(_)) => {}
            Err(e) => warn!(ref_id, error = %e, "reference pitch probe failed, recomputing"),
        }

        let contour = self.pitch.extract(ref_vocals, PitchMode::Fast).await?;
        let body = contour.to_npz_bytes()?;
        if let Err(e) = self
            .storage
            .put(
                &paths::reference_pitch(ref_id),
                bytes::Bytes::from(body),
                "application/octet-stream",
            )
            .await
        {
            warn!(ref_id, error = %e, "reference pitch upload failed");
        }
        Ok(contour)
    }
}

#[allow(clippy::too_many_arguments)]
fn compute_component_scores(
    user_vocals: &Path,
    ref_vocals: &Path,
    user_contour: &PitchContour,
    ref_contour: &PitchContour,
    user_text: &str,
    ref_text: &str,
    offset: f64,
) -> (f32, f32, f32, Vec<String>) {
    let mut warnings = Vec::new();

    let pitch = pitch_accuracy(user_contour, ref_contour, offset);

    let user_audio = load_wav_mono(user_vocals).ok();
    let ref_audio = load_wav_mono(ref_vocals).ok();
    let rhythm = rhythm_accuracy(
        user_audio.as_ref(),
        ref_audio.as_ref(),
        user_contour,
        ref_contour,
        offset,
    );

    let (lyrics, lyrics_warning) = lyrics_accuracy(user_text, ref_text);
    if let Some(warning) = lyrics_warning {
        warnings.push(warning);
    }

    (pitch, rhythm, lyrics, warnings)
}

fn mean_confidence(transcription: &Transcription) -> Option<f64> {
    if transcription.words.is_empty() {
        return None;
    }
    Some(
        transcription
            .words
            .iter()
            .map(|w| w.confidence as f64)
            .sum::<f64>()
            / transcription.words.len() as f64,
    )
}

fn original_file_name(recording: &str) -> String {
    let ext = recording.rsplit('.').next().unwrap_or("webm");
    let ext = if ext.len() <= 4 { ext } else { "webm" };
    format!("user_recording.{}", ext)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
