//! End-to-end pipeline tests against fake inference clients and an
//! in-memory blob store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use voicejury_cache::{LyricsCache, WordTimestampsCache, open_memory_pool};
use voicejury_core::clients::{
    GpuGate, JudgeClient, LyricsClient, LyricsQuery, MediaExtractor, Persona, PitchClient,
    PitchMode, SeparationClient, SeparationInput, SttClient, SttOutcome, StemPair,
};
use voicejury_core::{
    Error, JudgeComment, LyricsRecord, PitchContour, ReferenceStatus, Result, ScoreSummary,
    SessionRecord, SessionStatus, SessionStore, SyncQuality, Transcription, Vote, Word, paths,
};
use voicejury_engine::analysis::{AnalysisConfig, AnalysisPipeline};
use voicejury_engine::queue::{JobRunner, QUEUE_DEFAULT};
use voicejury_engine::reference::{ReferencePipeline, ReferenceSource};
use voicejury_session::MemorySessionStore;
use voicejury_storage::{BlobStore, BlobStoreConfig};

// ── In-memory blob backend ───────────────────────────────────────────────

#[derive(Clone, Default)]
struct BlobState {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl BlobState {
    fn insert(&self, full_path: &str, data: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert(full_path.to_string(), data);
    }

    fn get(&self, full_path: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(full_path).cloned()
    }

    fn contains(&self, full_path: &str) -> bool {
        self.objects.lock().unwrap().contains_key(full_path)
    }
}

struct UploadResponder(BlobState);
impl Respond for UploadResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let file_path = request
            .headers
            .get("x-file-path")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.0.insert(&file_path, request.body.clone());
        ResponseTemplate::new(200).set_body_json(serde_json::json!({}))
    }
}

struct FileResponder {
    state: BlobState,
    with_body: bool,
}
impl Respond for FileResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let full_path = request
            .url
            .path()
            .trim_start_matches("/files/")
            .to_string();
        match self.state.get(&full_path) {
            Some(data) if self.with_body => ResponseTemplate::new(200).set_body_bytes(data),
            Some(_) => ResponseTemplate::new(200),
            None => ResponseTemplate::new(404),
        }
    }
}

struct DeleteResponder(BlobState);
impl Respond for DeleteResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        if let Ok(body) = serde_json::from_slice::<serde_json::Value>(&request.body) {
            if let Some(path) = body.get("path").and_then(|p| p.as_str()) {
                self.0.objects.lock().unwrap().remove(path);
            }
        }
        ResponseTemplate::new(200)
    }
}

async fn start_blob_backend() -> (MockServer, BlobState, Arc<BlobStore>) {
    let state = BlobState::default();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/upload.php"))
        .respond_with(UploadResponder(state.clone()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/delete.php"))
        .respond_with(DeleteResponder(state.clone()))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path_regex("^/files/.*"))
        .respond_with(FileResponder {
            state: state.clone(),
            with_body: false,
        })
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/files/.*"))
        .respond_with(FileResponder {
            state: state.clone(),
            with_body: true,
        })
        .mount(&server)
        .await;

    let store = Arc::new(
        BlobStore::new(BlobStoreConfig {
            base_url: server.uri(),
            api_key: "test-key".to_string(),
            bucket: "voicejury".to_string(),
            backoff_base: Duration::from_millis(5),
            ..Default::default()
        })
        .unwrap(),
    );
    (server, state, store)
}

// ── Audio fixtures ───────────────────────────────────────────────────────

const BURSTS: [(f64, f64, f64); 4] = [
    (0.3, 0.3, 440.0),
    (1.2, 0.25, 520.0),
    (2.1, 0.35, 390.0),
    (3.2, 0.3, 600.0),
];

fn burst_wav_bytes(sample_rate: u32, total_seconds: f64) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let n = (total_seconds * sample_rate as f64) as usize;
    let mut samples = vec![0.0f64; n];
    for &(start, duration, freq) in &BURSTS {
        let s = (start * sample_rate as f64) as usize;
        let e = (((start + duration) * sample_rate as f64) as usize).min(n);
        for (k, sample) in samples[s..e].iter_mut().enumerate() {
            let t = k as f64 / sample_rate as f64;
            *sample = (2.0 * std::f64::consts::PI * freq * t).sin() * 0.8;
        }
    }
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in samples {
            writer.write_sample((s * i16::MAX as f64) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

fn melody_contour(frames: usize) -> PitchContour {
    let time: Vec<f32> = (0..frames).map(|i| i as f32 * 0.01).collect();
    let frequency: Vec<f32> = (0..frames)
        .map(|i| match (i / 25) % 4 {
            0 => 0.0,
            1 => 220.0,
            2 => 246.9,
            _ => 293.7,
        })
        .collect();
    let confidence = vec![0.9; frames];
    PitchContour::new(time, frequency, confidence).unwrap()
}

// ── Fakes ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeSeparation {
    calls: AtomicU32,
    fail: bool,
}

#[async_trait]
impl SeparationClient for FakeSeparation {
    async fn separate(&self, _input: &SeparationInput, workdir: &Path) -> Result<StemPair> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::CorruptAudio("unreadable container".to_string()));
        }
        tokio::fs::create_dir_all(workdir).await.unwrap();
        let vocals = workdir.join("vocals.wav");
        let instrumentals = workdir.join("instrumentals.wav");
        std::fs::write(&vocals, burst_wav_bytes(8000, 4.0)).unwrap();
        std::fs::write(&instrumentals, burst_wav_bytes(8000, 4.0)).unwrap();
        Ok(StemPair {
            vocals,
            instrumentals,
        })
    }
}

#[derive(Default)]
struct FakePitch {
    calls: AtomicU32,
    fail: bool,
}

#[async_trait]
impl PitchClient for FakePitch {
    async fn extract(&self, _vocals: &Path, _mode: PitchMode) -> Result<PitchContour> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::UpstreamUnavailable("pitch gpu down".to_string()));
        }
        Ok(melody_contour(300))
    }
}

#[derive(Default)]
struct FakeStt {
    fail: bool,
}

#[async_trait]
impl SttClient for FakeStt {
    async fn transcribe(
        &self,
        _vocals: &Path,
        language: &str,
        _prompt: Option<&str>,
    ) -> Result<SttOutcome> {
        if self.fail {
            return Err(Error::UpstreamUnavailable("all stt tiers failed".to_string()));
        }
        Ok(SttOutcome {
            transcription: Transcription {
                text: "je chante sous la pluie".to_string(),
                language: language.to_string(),
                words: vec![Word {
                    word: "je".to_string(),
                    start_ms: 300,
                    end_ms: 450,
                    confidence: 0.93,
                }],
            },
            provenance: "groq_whisper".to_string(),
        })
    }
}

struct FakeLyrics;

#[async_trait]
impl LyricsClient for FakeLyrics {
    async fn lookup(&self, _query: &LyricsQuery) -> Result<LyricsRecord> {
        Ok(LyricsRecord {
            text: "je chante sous la pluie".to_string(),
            lines: None,
            sync_quality: SyncQuality::Unsynced,
            provenance: "genius".to_string(),
            source_url: None,
        })
    }
}

struct FakeJudge;

#[async_trait]
impl JudgeClient for FakeJudge {
    async fn comment(
        &self,
        persona: &Persona,
        scores: &ScoreSummary,
        _track_title: &str,
    ) -> JudgeComment {
        JudgeComment {
            persona: persona.name.clone(),
            comment: "Une belle prestation.".to_string(),
            vote: if scores.overall >= persona.yes_threshold {
                Vote::Yes
            } else {
                Vote::No
            },
            model: "fake".to_string(),
            latency_ms: 1,
        }
    }
}

#[derive(Default)]
struct FakeGpu {
    calls: AtomicU32,
}

#[async_trait]
impl GpuGate for FakeGpu {
    async fn request_exclusive(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        true
    }
}

struct FakeExtractor;

#[async_trait]
impl MediaExtractor for FakeExtractor {
    async fn download_audio(&self, _source_url: &str, dest_dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dest_dir).await.unwrap();
        let dest = dest_dir.join("reference.flac");
        std::fs::write(&dest, burst_wav_bytes(8000, 4.0)).unwrap();
        Ok(dest)
    }
}

// ── Reference pipeline ───────────────────────────────────────────────────

struct ReferenceHarness {
    _server: MockServer,
    state: BlobState,
    sessions: Arc<MemorySessionStore>,
    separation: Arc<FakeSeparation>,
    pitch: Arc<FakePitch>,
    pipeline: ReferencePipeline,
    _temp: tempfile::TempDir,
}

async fn reference_harness() -> ReferenceHarness {
    let (server, state, storage) = start_blob_backend().await;
    let sessions = Arc::new(MemorySessionStore::new());
    let separation = Arc::new(FakeSeparation::default());
    let pitch = Arc::new(FakePitch::default());
    let temp = tempfile::tempdir().unwrap();

    let pipeline = ReferencePipeline {
        storage,
        sessions: sessions.clone(),
        separation: separation.clone(),
        pitch: pitch.clone(),
        extractor: Arc::new(FakeExtractor),
        gpu: Arc::new(FakeGpu::default()),
        temp_root: temp.path().to_path_buf(),
    };

    ReferenceHarness {
        _server: server,
        state,
        sessions,
        separation,
        pitch,
        pipeline,
        _temp: temp,
    }
}

async fn create_session(sessions: &MemorySessionStore, session_id: &str) {
    let mut record = SessionRecord::new(session_id, "track-1");
    record.track_name = "Ma chanson".to_string();
    record.artist_name = "Artiste".to_string();
    record.duration_ms = Some(240_000);
    sessions
        .create(record, Duration::from_secs(3 * 3600))
        .await
        .unwrap();
}

#[tokio::test]
async fn cold_reference_runs_all_substeps() {
    let h = reference_harness().await;
    create_session(&h.sessions, "s1").await;
    h.state
        .insert("voicejury/uploads/source.wav", burst_wav_bytes(8000, 4.0));

    let artifacts = h
        .pipeline
        .prepare_reference(
            "s1",
            "yt-abc",
            ReferenceSource::AudioUrl("uploads/source.wav".to_string()),
        )
        .await
        .unwrap();

    // All fingerprint-addressed artifacts were published
    assert!(h.state.contains("voicejury/cache/yt-abc/reference.wav"));
    assert!(h.state.contains("voicejury/cache/yt-abc/vocals.wav"));
    assert!(h.state.contains("voicejury/cache/yt-abc/instrumentals.wav"));
    assert!(h.state.contains("voicejury/cache/yt-abc/flow_envelope.json"));
    assert!(h.state.contains("voicejury/cache/yt-abc/pitch_data.npz"));
    // ... and the session-scoped copies
    assert!(h.state.contains("voicejury/sessions/s1_ref/vocals.wav"));
    assert!(h.state.contains("voicejury/sessions/s1_ref/instrumentals.wav"));

    assert!(artifacts.vocals_url.contains("cache/yt-abc/vocals.wav"));

    // Session marked ready, dedicated key written
    let record = h.sessions.read("s1").await.unwrap().unwrap();
    assert_eq!(record.reference_status, ReferenceStatus::Ready);
    assert!(
        h.sessions
            .get_key(&paths::tracks_ready_key("s1"))
            .await
            .unwrap()
            .is_some()
    );

    // The envelope artifact is well-formed JSON in [0, 1]
    let envelope: serde_json::Value = serde_json::from_slice(
        &h.state.get("voicejury/cache/yt-abc/flow_envelope.json").unwrap(),
    )
    .unwrap();
    assert_eq!(envelope["sample_rate_hz"], 20);

    assert_eq!(h.separation.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.pitch.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn warm_reference_skips_expensive_work_and_repeats_urls() {
    let h = reference_harness().await;
    create_session(&h.sessions, "s1").await;
    h.state
        .insert("voicejury/uploads/source.wav", burst_wav_bytes(8000, 4.0));

    let first = h
        .pipeline
        .prepare_reference(
            "s1",
            "yt-abc",
            ReferenceSource::AudioUrl("uploads/source.wav".to_string()),
        )
        .await
        .unwrap();

    create_session(&h.sessions, "s2").await;
    let second = h
        .pipeline
        .prepare_reference(
            "s2",
            "yt-abc",
            ReferenceSource::AudioUrl("uploads/source.wav".to_string()),
        )
        .await
        .unwrap();

    // Byte-identical blob paths, expensive computations at most once
    assert_eq!(first, second);
    assert_eq!(h.separation.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.pitch.calls.load(Ordering::SeqCst), 1);

    // The new session still got its scoped stem copies
    assert!(h.state.contains("voicejury/sessions/s2_ref/vocals.wav"));
}

#[tokio::test]
async fn corrupt_cached_pitch_triggers_recomputation() {
    let h = reference_harness().await;
    create_session(&h.sessions, "s1").await;

    // Warm stems and envelope, but a corrupt pitch artifact
    let wav = burst_wav_bytes(8000, 4.0);
    h.state.insert("voicejury/cache/yt-abc/vocals.wav", wav.clone());
    h.state
        .insert("voicejury/cache/yt-abc/instrumentals.wav", wav);
    h.state.insert(
        "voicejury/cache/yt-abc/flow_envelope.json",
        b"{\"sample_rate_hz\":20,\"values\":[],\"duration_seconds\":0}".to_vec(),
    );
    h.state.insert(
        "voicejury/cache/yt-abc/pitch_data.npz",
        b"corrupted bytes".to_vec(),
    );

    h.pipeline
        .prepare_reference(
            "s1",
            "yt-abc",
            ReferenceSource::VideoUrl("https://videos/watch?v=abc".to_string()),
        )
        .await
        .unwrap();

    // No separation (stems were warm), but pitch was recomputed and the
    // replacement artifact parses
    assert_eq!(h.separation.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.pitch.calls.load(Ordering::SeqCst), 1);
    let bytes = h.state.get("voicejury/cache/yt-abc/pitch_data.npz").unwrap();
    PitchContour::from_npz_bytes(&bytes).unwrap();

    // No session error
    let record = h.sessions.read("s1").await.unwrap().unwrap();
    assert_eq!(record.reference_status, ReferenceStatus::Ready);
}

#[tokio::test]
async fn reference_failure_marks_session_error() {
    let (server, state, storage) = start_blob_backend().await;
    let sessions = Arc::new(MemorySessionStore::new());
    let temp = tempfile::tempdir().unwrap();
    let pipeline = ReferencePipeline {
        storage,
        sessions: sessions.clone(),
        separation: Arc::new(FakeSeparation {
            fail: true,
            ..Default::default()
        }),
        pitch: Arc::new(FakePitch::default()),
        extractor: Arc::new(FakeExtractor),
        gpu: Arc::new(FakeGpu::default()),
        temp_root: temp.path().to_path_buf(),
    };
    create_session(&sessions, "s1").await;
    state.insert("voicejury/uploads/source.wav", burst_wav_bytes(8000, 4.0));

    let err = pipeline
        .prepare_reference(
            "s1",
            "yt-abc",
            ReferenceSource::AudioUrl("uploads/source.wav".to_string()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CorruptAudio(_)));

    let record = sessions.read("s1").await.unwrap().unwrap();
    assert_eq!(record.reference_status, ReferenceStatus::Error);
    assert!(record.error.is_some());
    drop(server);
}

// ── Analysis pipeline ────────────────────────────────────────────────────

struct AnalysisHarness {
    _server: MockServer,
    state: BlobState,
    sessions: Arc<MemorySessionStore>,
    word_timestamps: Arc<WordTimestampsCache>,
    pipeline: AnalysisPipeline,
    runner: Arc<JobRunner>,
    _temp: tempfile::TempDir,
}

async fn analysis_harness(stt_fails: bool, pitch_fails: bool) -> AnalysisHarness {
    let (server, state, storage) = start_blob_backend().await;
    let sessions = Arc::new(MemorySessionStore::new());
    let temp = tempfile::tempdir().unwrap();
    let pool = open_memory_pool().await.unwrap();
    let lyrics_cache = Arc::new(LyricsCache::new(pool.clone()));
    let word_timestamps = Arc::new(WordTimestampsCache::new(pool));

    let config = AnalysisConfig {
        stt_attempts: 2,
        stt_backoff_min: Duration::from_millis(1),
        stt_backoff_max: Duration::from_millis(5),
        temp_root: temp.path().to_path_buf(),
        ..Default::default()
    };

    let pipeline = AnalysisPipeline {
        storage,
        sessions: sessions.clone(),
        separation: Arc::new(FakeSeparation::default()),
        pitch: Arc::new(FakePitch {
            fail: pitch_fails,
            ..Default::default()
        }),
        stt: Arc::new(FakeStt { fail: stt_fails }),
        lyrics: Arc::new(FakeLyrics),
        judge: Arc::new(FakeJudge),
        gpu: Arc::new(FakeGpu::default()),
        lyrics_cache,
        word_timestamps: word_timestamps.clone(),
        config,
    };

    AnalysisHarness {
        _server: server,
        state,
        sessions,
        word_timestamps,
        pipeline,
        runner: JobRunner::new(Duration::from_secs(60)),
        _temp: temp,
    }
}

async fn uploaded_session(h: &AnalysisHarness, session_id: &str) {
    create_session(&h.sessions, session_id).await;
    // Reference prepared earlier: stems warm under the fingerprint
    let wav = burst_wav_bytes(8000, 4.0);
    h.state.insert("voicejury/cache/yt-abc/vocals.wav", wav.clone());
    h.state
        .insert("voicejury/cache/yt-abc/instrumentals.wav", wav.clone());
    // User upload in place
    let upload_key = format!("voicejury/sessions/{}/user_recording.webm", session_id);
    h.state.insert(&upload_key, wav);

    h.sessions
        .merge(
            session_id,
            voicejury_core::SessionPatch {
                reference_id: Some("yt-abc".to_string()),
                reference_status: Some(ReferenceStatus::Ready),
                reference_recording: Some("cache/yt-abc/reference.wav".to_string()),
                user_recording: Some(format!(
                    "sessions/{}/user_recording.webm",
                    session_id
                )),
                status: Some(SessionStatus::RecordingUploaded),
                ..Default::default()
            },
        )
        .await
        .unwrap();
}

fn test_sink(runner: &Arc<JobRunner>) -> voicejury_engine::ProgressSink {
    // A real sink attached to a dummy task
    let mut sink_slot = None;
    let (tx, rx) = std::sync::mpsc::channel();
    runner
        .submit(QUEUE_DEFAULT, |sink| {
            tx.send(sink).unwrap();
            Box::pin(async move {
                // Park long enough for the test to finish
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(serde_json::Value::Null)
            })
        })
        .unwrap();
    if let Ok(sink) = rx.recv_timeout(Duration::from_secs(5)) {
        sink_slot = Some(sink);
    }
    sink_slot.unwrap()
}

#[tokio::test]
async fn full_analysis_produces_a_bundle() {
    let h = analysis_harness(false, false).await;
    uploaded_session(&h, "s1").await;
    let sink = test_sink(&h.runner);

    let bundle = h.pipeline.analyze_performance("s1", &sink).await.unwrap();

    assert!(bundle.score <= 100);
    assert_eq!(bundle.jury_comments.len(), 3);
    assert_eq!(bundle.auto_sync.method, "cross_correlation");
    // Identical stems on both sides: sync is confident and pitch matches
    assert!(bundle.auto_sync.confidence >= 0.9);
    assert!(bundle.auto_sync.offset_seconds.abs() < 0.1);
    assert_eq!(bundle.pitch_accuracy, 100.0);
    assert_eq!(bundle.lyrics_accuracy, 100.0);

    // The user's separated tracks were advertised before the verdict
    assert!(h.state.contains("voicejury/sessions/s1_user/vocals.wav"));
    assert!(h.state.contains("voicejury/sessions/s1_user/instrumentals.wav"));
    assert!(
        h.sessions
            .get_key(&paths::user_tracks_ready_key("s1"))
            .await
            .unwrap()
            .is_some()
    );

    // Terminal state is persisted on the session record
    let record = h.sessions.read("s1").await.unwrap().unwrap();
    assert_eq!(record.status, SessionStatus::Completed);
    assert!(record.result.is_some());

    // Provenance flowed into the word timestamps cache
    let cached = h
        .word_timestamps
        .get("track-1", Some("yt-abc"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.provenance, "groq_whisper");
}

#[tokio::test]
async fn stt_outage_degrades_gracefully() {
    let h = analysis_harness(true, false).await;
    uploaded_session(&h, "s1").await;
    let sink = test_sink(&h.runner);

    let bundle = h.pipeline.analyze_performance("s1", &sink).await.unwrap();

    // Empty user transcription → lyrics 0, but judges still voted
    assert_eq!(bundle.lyrics_accuracy, 0.0);
    assert_eq!(bundle.jury_comments.len(), 3);
    assert!(
        bundle
            .warnings
            .iter()
            .any(|w| w.contains("Transcription"))
    );

    let record = h.sessions.read("s1").await.unwrap().unwrap();
    assert_eq!(record.status, SessionStatus::Completed);
}

#[tokio::test]
async fn critical_pitch_failure_marks_session_error() {
    let h = analysis_harness(false, true).await;
    uploaded_session(&h, "s1").await;
    let sink = test_sink(&h.runner);

    let err = h.pipeline.analyze_performance("s1", &sink).await.unwrap_err();
    assert!(matches!(err, Error::UpstreamUnavailable(_)));

    let record = h.sessions.read("s1").await.unwrap().unwrap();
    assert_eq!(record.status, SessionStatus::Error);
    assert!(record.error.unwrap().contains("pitch"));
}

#[tokio::test]
async fn analysis_requires_an_uploaded_recording() {
    let h = analysis_harness(false, false).await;
    create_session(&h.sessions, "s1").await;
    let sink = test_sink(&h.runner);

    let err = h.pipeline.analyze_performance("s1", &sink).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}
