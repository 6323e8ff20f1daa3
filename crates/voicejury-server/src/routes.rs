//! Session routes
//!
//! One start call, one upload call, one analysis trigger and the read
//! endpoints. Track/video lookup happens upstream of this service: the
//! client arrives here with a recognised track and a chosen reference
//! fingerprint.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::info;

use voicejury_core::{
    Error, ReferenceStatus, SessionPatch, SessionRecord, SessionStatus, paths,
};
use voicejury_engine::queue::{QUEUE_GPU_HEAVY, TaskState};
use voicejury_engine::reference::ReferenceSource;
use voicejury_session::require_session;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub track_id: String,
    pub track_name: String,
    pub artist_name: String,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// Reference-video fingerprint chosen for this track.
    pub reference_id: String,
    /// Directly fetchable reference audio URL.
    #[serde(default)]
    pub reference_url: Option<String>,
    /// Source-video URL for the external extractor.
    #[serde(default)]
    pub source_video_url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub reference_status: ReferenceStatus,
}

/// POST /api/session/start — create the session, enqueue reference
/// preparation, return immediately.
pub async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> ApiResult<Json<StartSessionResponse>> {
    let source = match (&request.reference_url, &request.source_video_url) {
        (Some(url), _) => ReferenceSource::AudioUrl(url.clone()),
        (None, Some(url)) => ReferenceSource::VideoUrl(url.clone()),
        (None, None) => {
            return Err(Error::Validation(
                "reference_url or source_video_url is required".to_string(),
            )
            .into());
        }
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    let mut record = SessionRecord::new(&session_id, &request.track_id);
    record.track_name = request.track_name.clone();
    record.artist_name = request.artist_name.clone();
    record.duration_ms = request.duration_ms;
    record.reference_id = Some(request.reference_id.clone());
    state.sessions.create(record, state.session_ttl).await?;

    let pipeline = state.reference.clone();
    let job_session = session_id.clone();
    let ref_id = request.reference_id.clone();
    state.runner.submit(QUEUE_GPU_HEAVY, move |_sink| {
        Box::pin(async move {
            let artifacts = pipeline
                .prepare_reference(&job_session, &ref_id, source)
                .await?;
            Ok(serde_json::to_value(artifacts)?)
        })
    })?;

    info!(session_id, track = %request.track_name, "session started");
    Ok(Json(StartSessionResponse {
        session_id,
        status: SessionStatus::Created,
        reference_status: ReferenceStatus::Pending,
    }))
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub session_id: String,
    pub status: &'static str,
    pub file_size: usize,
    pub message: String,
}

/// POST /api/session/{id}/upload-recording — raw audio body; the
/// Content-Type header decides the stored extension.
pub async fn upload_recording(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<UploadResponse>> {
    let session = require_session(state.sessions.as_ref(), &session_id).await?;
    if session.reference_status != ReferenceStatus::Ready {
        return Err(Error::Validation("Reference audio not ready yet".to_string()).into());
    }
    if body.is_empty() {
        return Err(Error::Validation("Empty recording".to_string()).into());
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("audio/webm");
    let ext = if content_type.contains("wav") { "wav" } else { "webm" };

    let key = paths::user_recording(&session_id, ext);
    let file_size = body.len();
    state.storage.put(&key, body, content_type).await?;

    state
        .sessions
        .merge(
            &session_id,
            SessionPatch {
                user_recording: Some(key),
                status: Some(SessionStatus::RecordingUploaded),
                ..Default::default()
            },
        )
        .await?;

    info!(session_id, file_size, "recording uploaded");
    Ok(Json(UploadResponse {
        session_id,
        status: "uploaded",
        file_size,
        message: "Enregistrement reçu. Prêt pour l'analyse.".to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub session_id: String,
    pub task_id: String,
    pub status: &'static str,
    pub message: String,
}

/// POST /api/session/{id}/analyze — enqueue the full analysis pipeline.
pub async fn start_analysis(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<AnalyzeResponse>> {
    let session = require_session(state.sessions.as_ref(), &session_id).await?;
    if session.reference_status != ReferenceStatus::Ready {
        return Err(Error::Validation("Reference audio not ready".to_string()).into());
    }
    if session.user_recording.is_none() {
        return Err(Error::Validation("User recording not uploaded".to_string()).into());
    }

    state
        .sessions
        .merge(
            &session_id,
            SessionPatch {
                status: Some(SessionStatus::Analyzing),
                ..Default::default()
            },
        )
        .await?;

    let pipeline = state.analysis.clone();
    let job_session = session_id.clone();
    let task_id = state.runner.submit(QUEUE_GPU_HEAVY, move |sink| {
        Box::pin(async move {
            let bundle = pipeline.analyze_performance(&job_session, &sink).await?;
            Ok(serde_json::to_value(bundle)?)
        })
    })?;

    state
        .sessions
        .merge(
            &session_id,
            SessionPatch {
                analysis_task_id: Some(task_id.clone()),
                ..Default::default()
            },
        )
        .await?;

    info!(session_id, task_id, "analysis enqueued");
    Ok(Json(AnalyzeResponse {
        session_id,
        task_id,
        status: "analyzing",
        message: "Analyse en cours... Le jury délibère !".to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub reference_status: ReferenceStatus,
    pub reference_ready: bool,
    pub track_name: String,
    pub artist_name: String,
    pub error: Option<String>,
}

/// GET /api/session/{id}/status
pub async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionStatusResponse>> {
    let session = require_session(state.sessions.as_ref(), &session_id).await?;
    Ok(Json(SessionStatusResponse {
        session_id,
        status: session.status,
        reference_status: session.reference_status,
        reference_ready: session.reference_status == ReferenceStatus::Ready,
        track_name: session.track_name,
        artist_name: session.artist_name,
        error: session.error,
    }))
}

/// GET /api/session/{id}/results — the terminal bundle, or 202 while the
/// analysis is still running.
pub async fn session_results(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Response> {
    let session = require_session(state.sessions.as_ref(), &session_id).await?;

    if let Some(result) = &session.result {
        return Ok(Json(serde_json::json!({
            "session_id": session_id,
            "track_name": session.track_name,
            "artist_name": session.artist_name,
            "results": result,
        }))
        .into_response());
    }

    match session
        .analysis_task_id
        .as_deref()
        .and_then(|task_id| state.runner.state(task_id))
    {
        Some(TaskState::Success(results)) => Ok(Json(serde_json::json!({
            "session_id": session_id,
            "track_name": session.track_name,
            "artist_name": session.artist_name,
            "results": results,
        }))
        .into_response()),
        Some(TaskState::Failure(error)) => {
            Err(Error::Fatal(format!("analysis failed: {}", error)).into())
        }
        Some(_) => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "detail": "Analysis in progress" })),
        )
            .into_response()),
        None => Err(Error::NotFound("No results available".to_string()).into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct LyricsOffsetRequest {
    pub offset_seconds: f64,
}

#[derive(Debug, Serialize)]
pub struct LyricsOffsetResponse {
    pub track_id: String,
    pub reference_id: String,
    pub offset_seconds: f64,
}

/// GET /api/session/{id}/lyrics-offset — saved display offset for the
/// session's (track, reference) pair; 0.0 when none was saved.
pub async fn get_lyrics_offset(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<LyricsOffsetResponse>> {
    let session = require_session(state.sessions.as_ref(), &session_id).await?;
    let (track_id, reference_id) = offset_keys(&session)?;
    let offset_seconds = state.offsets.get(&track_id, &reference_id).await?;
    Ok(Json(LyricsOffsetResponse {
        track_id,
        reference_id,
        offset_seconds,
    }))
}

/// POST /api/session/{id}/lyrics-offset — persist the offset permanently.
pub async fn set_lyrics_offset(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<LyricsOffsetRequest>,
) -> ApiResult<Json<LyricsOffsetResponse>> {
    let session = require_session(state.sessions.as_ref(), &session_id).await?;
    let (track_id, reference_id) = offset_keys(&session)?;
    let offset_seconds = state
        .offsets
        .set(&track_id, &reference_id, request.offset_seconds)
        .await?;
    Ok(Json(LyricsOffsetResponse {
        track_id,
        reference_id,
        offset_seconds,
    }))
}

fn offset_keys(session: &SessionRecord) -> Result<(String, String), ApiError> {
    let reference_id = session
        .reference_id
        .clone()
        .ok_or_else(|| Error::Validation("Session missing reference info".to_string()))?;
    Ok((session.track_id.clone(), reference_id))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "voicejury",
        version: env!("CARGO_PKG_VERSION"),
    })
}
