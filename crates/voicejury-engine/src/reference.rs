//! Reference preparation pipeline
//!
//! Produces, once per reference-video fingerprint, everything the analysis
//! pipeline needs: separated stems, the pitch contour and the flow
//! envelope. All outputs are content-addressed under the fingerprint, so a
//! second run for the same video finds every probe warm and does no GPU
//! work.
//!
//! Uploads are best-effort: the expected public URLs are computed up front
//! and returned even when an upload fails, so later stages can still try
//! to fetch. A pipeline failure marks the session in error and re-raises.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use voicejury_core::clients::{
    GpuGate, MediaExtractor, PitchClient, PitchMode, SeparationClient, SeparationInput, StemPair,
};
use voicejury_core::{
    Error, PitchContour, ReferenceStatus, Result, SessionPatch, SessionStore, paths,
};
use voicejury_storage::BlobStore;

use crate::envelope::compute_flow_envelope;

/// TTL of the dedicated ready-key.
const READY_KEY_TTL: Duration = Duration::from_secs(3600);

/// Where the reference audio comes from.
#[derive(Debug, Clone)]
pub enum ReferenceSource {
    /// A directly fetchable audio URL (blob key or full URL).
    AudioUrl(String),
    /// A source-video URL handed to the external extractor.
    VideoUrl(String),
}

/// Blob locations of the prepared artifacts. Deterministic per
/// fingerprint: two runs return byte-identical URLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceArtifacts {
    pub reference_url: String,
    pub vocals_url: String,
    pub instrumentals_url: String,
    pub envelope_url: String,
    pub pitch_url: String,
}

pub struct ReferencePipeline {
    pub storage: Arc<BlobStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub separation: Arc<dyn SeparationClient>,
    pub pitch: Arc<dyn PitchClient>,
    pub extractor: Arc<dyn MediaExtractor>,
    pub gpu: Arc<dyn GpuGate>,
    pub temp_root: PathBuf,
}

impl ReferencePipeline {
    /// Prepare the reference for a session. Idempotent on `ref_id`.
    pub async fn prepare_reference(
        &self,
        session_id: &str,
        ref_id: &str,
        source: ReferenceSource,
    ) -> Result<ReferenceArtifacts> {
        let workdir = self.temp_root.join(format!("ref-{}-{}", ref_id, session_id));
        let result = self.run(session_id, ref_id, &source, &workdir).await;
        if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(workdir = %workdir.display(), error = %e, "failed to remove staging dir");
            }
        }

        match result {
            Ok(artifacts) => {
                self.sessions
                    .set_key(
                        &paths::tracks_ready_key(session_id),
                        chrono::Utc::now().timestamp().to_string(),
                        READY_KEY_TTL,
                    )
                    .await?;
                self.sessions
                    .merge(
                        session_id,
                        SessionPatch {
                            reference_status: Some(ReferenceStatus::Ready),
                            reference_id: Some(ref_id.to_string()),
                            reference_recording: Some(artifacts.reference_url.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;
                info!(session_id, ref_id, "reference ready");
                Ok(artifacts)
            }
            Err(e) => {
                warn!(session_id, ref_id, error = %e, "reference preparation failed");
                let _ = self
                    .sessions
                    .merge(
                        session_id,
                        SessionPatch {
                            reference_status: Some(ReferenceStatus::Error),
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
        ref_id: &str,
        source: &ReferenceSource,
        workdir: &Path,
    ) -> Result<ReferenceArtifacts> {
        tokio::fs::create_dir_all(workdir).await?;

        let original_ext = match source {
            ReferenceSource::AudioUrl(url) if url.ends_with(".wav") => "wav",
            _ => "flac",
        };
        let artifacts = ReferenceArtifacts {
            reference_url: self
                .storage
                .public_url(&paths::reference_original(ref_id, original_ext)),
            vocals_url: self.storage.public_url(&paths::reference_vocals(ref_id)),
            instrumentals_url: self
                .storage
                .public_url(&paths::reference_instrumentals(ref_id)),
            envelope_url: self.storage.public_url(&paths::flow_envelope(ref_id)),
            pitch_url: self.storage.public_url(&paths::reference_pitch(ref_id)),
        };

        self.sessions
            .merge(
                session_id,
                SessionPatch {
                    reference_status: Some(ReferenceStatus::Downloading),
                    ..Default::default()
                },
            )
            .await?;

        // Both stems cached means source acquisition and separation can be
        // skipped outright.
        let stems_cached = self.storage.exists(&paths::reference_vocals(ref_id)).await
            && self
                .storage
                .exists(&paths::reference_instrumentals(ref_id))
                .await;

        let local_stems: Option<StemPair> = if stems_cached {
            info!(ref_id, "stems cache hit, skipping acquisition and separation");
            None
        } else {
            let original = self.acquire_source(source, workdir, original_ext).await?;

            // Publish the original under its fingerprint for downstream
            // fallback; losing this upload costs only a future re-download.
            if let Err(e) = self
                .storage
                .put_file(
                    &original,
                    &paths::reference_original(ref_id, original_ext),
                    content_type_for(original_ext),
                )
                .await
            {
                warn!(ref_id, error = %e, "reference original upload failed");
            }

            self.gpu.request_exclusive().await;
            let stems = self
                .separation
                .separate(&SeparationInput::LocalFile(original), &workdir.join("stems"))
                .await?;

            for (local, key) in [
                (&stems.vocals, paths::reference_vocals(ref_id)),
                (&stems.instrumentals, paths::reference_instrumentals(ref_id)),
            ] {
                if let Err(e) = self.storage.put_file(local, &key, "audio/wav").await {
                    warn!(ref_id, key, error = %e, "stem upload failed");
                }
            }
            Some(stems)
        };

        // Session-scoped copies so the event stream can advertise playable
        // tracks under the session's own namespace.
        self.publish_session_stems(session_id, ref_id, local_stems.as_ref())
            .await;

        // Flow envelope, skipped when cached.
        if !self.storage.exists(&paths::flow_envelope(ref_id)).await {
            match self.ensure_local_vocals(ref_id, local_stems.as_ref(), workdir).await {
                Ok(vocals) => {
                    let vocals_path = vocals.clone();
                    let envelope =
                        tokio::task::spawn_blocking(move || compute_flow_envelope(&vocals_path))
                            .await
                            .map_err(|e| Error::Fatal(format!("envelope task: {}", e)))?;
                    match envelope {
                        Ok(envelope) => {
                            let body = serde_json::to_vec(&envelope)?;
                            if let Err(e) = self
                                .storage
                                .put(
                                    &paths::flow_envelope(ref_id),
                                    bytes::Bytes::from(body),
                                    "application/json",
                                )
                                .await
                            {
                                warn!(ref_id, error = %e, "flow envelope upload failed");
                            }
                        }
                        Err(e) => warn!(ref_id, error = %e, "flow envelope computation failed"),
                    }
                }
                Err(e) => warn!(ref_id, error = %e, "no local vocals for flow envelope"),
            }
        }

        // Pitch contour: probe, validate, recompute when corrupt.
        let pitch_cached = match self.storage.get(&paths::reference_pitch(ref_id)).await {
            Ok(bytes) => match PitchContour::from_npz_bytes(&bytes) {
                Ok(_) => true,
                Err(e) => {
                    warn!(ref_id, error = %e, "cached pitch artifact is corrupt, recomputing");
                    false
                }
            },
            Err(Error::NotFound(_)) => false,
            Err(e) => {
                warn!(ref_id, error = %e, "pitch cache probe failed, recomputing");
                false
            }
        };

        if !pitch_cached {
            let vocals = self
                .ensure_local_vocals(ref_id, local_stems.as_ref(), workdir)
                .await?;
            let contour = self.pitch.extract(&vocals, PitchMode::Fast).await?;
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
                warn!(ref_id, error = %e, "pitch artifact upload failed");
            }
        }

        Ok(artifacts)
    }

    async fn acquire_source(
        &self,
        source: &ReferenceSource,
        workdir: &Path,
        ext: &str,
    ) -> Result<PathBuf> {
        match source {
            ReferenceSource::AudioUrl(url) => {
                let dest = workdir.join(format!("reference.{}", ext));
                self.storage.get_to_file(url, &dest).await?;
                Ok(dest)
            }
            ReferenceSource::VideoUrl(url) => self.extractor.download_audio(url, workdir).await,
        }
    }

    /// Copy stems into the session namespace; losing these only degrades
    /// multi-track playback, never the analysis.
    async fn publish_session_stems(
        &self,
        session_id: &str,
        ref_id: &str,
        local_stems: Option<&StemPair>,
    ) {
        let targets = [
            paths::session_reference_vocals(session_id),
            paths::session_reference_instrumentals(session_id),
        ];
        match local_stems {
            Some(stems) => {
                for (local, key) in [(&stems.vocals, &targets[0]), (&stems.instrumentals, &targets[1])]
                {
                    if let Err(e) = self.storage.put_file(local, key, "audio/wav").await {
                        warn!(session_id, key, error = %e, "session stem upload failed");
                    }
                }
            }
            None => {
                let sources = [
                    paths::reference_vocals(ref_id),
                    paths::reference_instrumentals(ref_id),
                ];
                for (source_key, target_key) in sources.iter().zip(&targets) {
                    match self.storage.get(source_key).await {
                        Ok(data) => {
                            if let Err(e) =
                                self.storage.put(target_key, data, "audio/wav").await
                            {
                                warn!(session_id, target_key, error = %e, "session stem upload failed");
                            }
                        }
                        Err(e) => {
                            warn!(session_id, source_key, error = %e, "cached stem fetch failed")
                        }
                    }
                }
            }
        }
    }

    /// Local vocals for envelope/pitch work: the freshly separated stem if
    /// this run produced one, otherwise a download from the cache.
    async fn ensure_local_vocals(
        &self,
        ref_id: &str,
        local_stems: Option<&StemPair>,
        workdir: &Path,
    ) -> Result<PathBuf> {
        if let Some(stems) = local_stems {
            return Ok(stems.vocals.clone());
        }
        let dest = workdir.join("vocals.wav");
        if !dest.exists() {
            self.storage
                .get_to_file(&paths::reference_vocals(ref_id), &dest)
                .await?;
        }
        Ok(dest)
    }
}

fn content_type_for(ext: &str) -> &'static str {
    match ext {
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}
