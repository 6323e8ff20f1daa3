//! Application state and bootstrap
//!
//! One process-wide instance of every client, built from the config and
//! handed to handlers behind `Arc`s. The pipelines receive their
//! dependencies through the trait seams in `voicejury-core`, so tests can
//! assemble the same state from fakes.

use std::sync::Arc;
use std::time::Duration;

use voicejury_cache::{LyricsCache, LyricsOffsetStore, WordTimestampsCache, open_cache_pool};
use voicejury_core::SessionStore;
use voicejury_core::sweep::ExpirySweep;
use voicejury_engine::analysis::{AnalysisConfig, AnalysisPipeline};
use voicejury_engine::queue::JobRunner;
use voicejury_engine::reference::ReferencePipeline;
use voicejury_inference::{
    GpuCoordinator, HttpClientConfig, HttpMediaExtractor, HttpPitchClient, HttpSeparationClient,
    JudgeModelConfig, LlmJudgeClient, PlainProviderConfig, SttTier, SyncedProviderConfig,
    TieredLyricsClient, TieredSttClient, create_client,
};
use voicejury_session::MemorySessionStore;
use voicejury_storage::{BlobStore, BlobStoreConfig};

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<dyn SessionStore>,
    pub storage: Arc<BlobStore>,
    pub runner: Arc<JobRunner>,
    pub reference: Arc<ReferencePipeline>,
    pub analysis: Arc<AnalysisPipeline>,
    pub offsets: Arc<LyricsOffsetStore>,
    pub session_ttl: Duration,
}

/// Build the process-wide state from configuration. Returns the expiry
/// sweepers separately so the caller can wire them into the reaper.
pub async fn build_state(
    config: &ServerConfig,
) -> anyhow::Result<(AppState, Vec<Arc<dyn ExpirySweep>>)> {
    let storage = Arc::new(BlobStore::new(BlobStoreConfig {
        base_url: config.storage.base_url.clone(),
        api_key: config.storage.api_key.clone(),
        bucket: config.storage.bucket.clone(),
        ..Default::default()
    })?);

    let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());

    let pool = open_cache_pool(&config.expanded_cache_db()).await?;
    let lyrics_cache = Arc::new(LyricsCache::new(pool.clone()));
    let word_timestamps = Arc::new(WordTimestampsCache::new(pool.clone()));
    let offsets = Arc::new(LyricsOffsetStore::new(pool));

    let http = create_client(&HttpClientConfig::default())?;
    let inference = &config.inference;

    let separation = Arc::new(HttpSeparationClient::new(
        http.clone(),
        inference.separation_url.clone(),
    ));
    let pitch = Arc::new(HttpPitchClient::new(http.clone(), inference.pitch_url.clone()));
    let extractor = Arc::new(HttpMediaExtractor::new(
        http.clone(),
        inference.extractor_url.clone(),
    ));
    let gpu = Arc::new(GpuCoordinator::new(
        http.clone(),
        inference.cotenant_url.clone(),
        inference.cotenant_model.clone(),
    ));

    let mut stt_tiers = vec![SttTier::SharedService {
        base_url: inference.stt_shared_url.clone(),
    }];
    if !inference.stt_public_api_key.is_empty() {
        stt_tiers.push(SttTier::PublicApi {
            base_url: inference.stt_public_api_url.clone(),
            api_key: inference.stt_public_api_key.clone(),
        });
    }
    // Local tier ships disabled; a deployment can plug an engine in.
    stt_tiers.push(SttTier::Local { engine: None });
    let stt = Arc::new(TieredSttClient::new(http.clone(), stt_tiers));

    let lyrics = Arc::new(TieredLyricsClient::new(
        http.clone(),
        Some(SyncedProviderConfig {
            base_url: inference.lyrics_synced_url.clone(),
        }),
        (!inference.lyrics_plain_token.is_empty()).then(|| PlainProviderConfig {
            base_url: inference.lyrics_plain_url.clone(),
            api_token: inference.lyrics_plain_token.clone(),
        }),
    ));

    let judge = Arc::new(LlmJudgeClient::new(
        http,
        JudgeModelConfig {
            base_url: inference.cotenant_url.clone(),
            primary_model: inference.judge_primary_model.clone(),
            secondary_model: inference.judge_secondary_model.clone(),
            ..Default::default()
        },
    ));

    let reference = Arc::new(ReferencePipeline {
        storage: storage.clone(),
        sessions: sessions.clone(),
        separation: separation.clone(),
        pitch: pitch.clone(),
        extractor,
        gpu: gpu.clone(),
        temp_root: config.analysis.temp_dir.clone(),
    });

    let analysis = Arc::new(AnalysisPipeline {
        storage: storage.clone(),
        sessions: sessions.clone(),
        separation,
        pitch,
        stt,
        lyrics,
        judge,
        gpu,
        lyrics_cache: lyrics_cache.clone(),
        word_timestamps: word_timestamps.clone(),
        config: AnalysisConfig {
            language: config.analysis.language.clone(),
            temp_root: config.analysis.temp_dir.clone(),
            ..Default::default()
        },
    });

    let state = AppState {
        sessions,
        storage,
        runner: JobRunner::with_default_timeout(),
        reference,
        analysis,
        offsets,
        session_ttl: Duration::from_secs(config.analysis.session_ttl_secs),
    };
    let sweepers: Vec<Arc<dyn ExpirySweep>> = vec![lyrics_cache, word_timestamps];
    Ok((state, sweepers))
}
