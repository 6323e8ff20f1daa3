//! Session event stream
//!
//! One SSE stream per session. Polls the session record and the analysis
//! task state every 500 ms and emits only on state change; a heartbeat
//! every 15 s keeps intermediaries from closing the connection, and the
//! stream times out after 10 minutes. Client disconnection drops the
//! stream — the analysis task keeps running and writes its result to the
//! session record regardless.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use voicejury_core::{ReferenceStatus, SessionStore, paths};
use voicejury_engine::queue::{JobRunner, TaskState};

use crate::error::ApiError;
use crate::state::AppState;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_DURATION: Duration = Duration::from_secs(600);

/// Timing knobs, shrunk by tests.
#[derive(Debug, Clone)]
pub struct StreamTiming {
    pub poll: Duration,
    pub heartbeat: Duration,
    pub max_duration: Duration,
}

impl Default for StreamTiming {
    fn default() -> Self {
        Self {
            poll: POLL_INTERVAL,
            heartbeat: HEARTBEAT_INTERVAL,
            max_duration: MAX_DURATION,
        }
    }
}

/// A named event before SSE framing; kept structural so tests can assert
/// on it directly.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub name: &'static str,
    pub data: Value,
}

struct PollState {
    sessions: Arc<dyn SessionStore>,
    runner: Arc<JobRunner>,
    session_id: String,
    timing: StreamTiming,
    elapsed: Duration,
    heartbeat_elapsed: Duration,
    last_ref_status: Option<ReferenceStatus>,
    last_progress_step: Option<String>,
    last_tracks_ready: Option<String>,
    last_user_tracks_ready: Option<String>,
    queue: VecDeque<StreamEvent>,
    done: bool,
}

/// Push-based view of a session: emits `connected` immediately, then one
/// event per observed state change until a terminal event or the timeout.
pub fn session_event_stream(
    sessions: Arc<dyn SessionStore>,
    runner: Arc<JobRunner>,
    session_id: String,
    timing: StreamTiming,
) -> impl Stream<Item = StreamEvent> {
    let mut queue = VecDeque::new();
    queue.push_back(StreamEvent {
        name: "connected",
        data: json!({ "session_id": session_id }),
    });

    let state = PollState {
        sessions,
        runner,
        session_id,
        timing,
        elapsed: Duration::ZERO,
        heartbeat_elapsed: Duration::ZERO,
        last_ref_status: None,
        last_progress_step: None,
        last_tracks_ready: None,
        last_user_tracks_ready: None,
        queue,
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.queue.pop_front() {
                return Some((event, state));
            }
            if state.done {
                return None;
            }
            if state.elapsed >= state.timing.max_duration {
                state.queue.push_back(StreamEvent {
                    name: "timeout",
                    data: json!({ "message": "SSE connection timed out after 10 minutes" }),
                });
                state.done = true;
                continue;
            }

            tokio::time::sleep(state.timing.poll).await;
            state.elapsed += state.timing.poll;
            state.heartbeat_elapsed += state.timing.poll;

            poll_once(&mut state).await;

            if state.heartbeat_elapsed >= state.timing.heartbeat {
                state.heartbeat_elapsed = Duration::ZERO;
                state.queue.push_back(StreamEvent {
                    name: "heartbeat",
                    data: json!({ "elapsed": state.elapsed.as_secs() }),
                });
            }
        }
    })
}

/// One poll tick: diff observable state against what was last emitted.
async fn poll_once(state: &mut PollState) {
    let session = match state.sessions.read(&state.session_id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            state.queue.push_back(StreamEvent {
                name: "error",
                data: json!({ "message": "Session not found" }),
            });
            state.done = true;
            return;
        }
        Err(e) => {
            debug!(session_id = %state.session_id, error = %e, "sse poll failed");
            return;
        }
    };

    // Reference readiness
    if state.last_ref_status != Some(session.reference_status) {
        state.last_ref_status = Some(session.reference_status);
        state.queue.push_back(StreamEvent {
            name: "session_status",
            data: json!({
                "session_id": state.session_id,
                "status": session.status,
                "reference_status": session.reference_status,
                "reference_ready": session.reference_status == ReferenceStatus::Ready,
                "track_name": session.track_name,
                "artist_name": session.artist_name,
                "error": session.error,
            }),
        });
    }

    // Dedicated ready-keys (never read from record fields: the keys cannot
    // race a concurrent merge)
    if let Ok(value) = state
        .sessions
        .get_key(&paths::tracks_ready_key(&state.session_id))
        .await
    {
        if value.is_some() && value != state.last_tracks_ready {
            state.last_tracks_ready = value;
            state.queue.push_back(StreamEvent {
                name: "tracks_ready",
                data: json!({
                    "session_id": state.session_id,
                    "source": "ref",
                    "tracks": ["vocals", "instrumentals"],
                }),
            });
        }
    }
    if let Ok(value) = state
        .sessions
        .get_key(&paths::user_tracks_ready_key(&state.session_id))
        .await
    {
        if value.is_some() && value != state.last_user_tracks_ready {
            state.last_user_tracks_ready = value;
            state.queue.push_back(StreamEvent {
                name: "user_tracks_ready",
                data: json!({
                    "session_id": state.session_id,
                    "source": "user",
                    "tracks": ["vocals", "instrumentals"],
                }),
            });
        }
    }

    // Analysis task
    let Some(task_id) = session.analysis_task_id.clone() else {
        return;
    };
    match state.runner.state(&task_id) {
        Some(TaskState::Progress(marker)) => {
            if state.last_progress_step.as_deref() != Some(marker.step.as_str()) {
                state.last_progress_step = Some(marker.step.clone());
                state.queue.push_back(StreamEvent {
                    name: "analysis_progress",
                    data: json!({
                        "session_id": state.session_id,
                        "task_id": task_id,
                        "step": marker.step,
                        "progress": marker.progress,
                        "detail": marker.detail,
                    }),
                });
            }
        }
        Some(TaskState::Success(results)) => {
            state.queue.push_back(StreamEvent {
                name: "analysis_complete",
                data: json!({
                    "session_id": state.session_id,
                    "task_id": task_id,
                    "results": results,
                }),
            });
            state.done = true;
        }
        Some(TaskState::Failure(error)) => {
            state.queue.push_back(StreamEvent {
                name: "analysis_error",
                data: json!({
                    "session_id": state.session_id,
                    "task_id": task_id,
                    "error": error,
                }),
            });
            state.done = true;
        }
        Some(TaskState::Pending) | None => {}
    }
}

/// GET /api/session/{session_id}/stream
pub async fn stream_session_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    if state.sessions.read(&session_id).await?.is_none() {
        return Err(ApiError(voicejury_core::Error::NotFound(format!(
            "session {}",
            session_id
        ))));
    }

    let stream = session_event_stream(
        state.sessions.clone(),
        state.runner.clone(),
        session_id,
        StreamTiming::default(),
    )
    .map(|event| {
        Ok::<_, Infallible>(
            Event::default()
                .event(event.name)
                .data(event.data.to_string()),
        )
    });

    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    // Reverse proxies must not buffer the stream
    headers.insert("X-Accel-Buffering", header::HeaderValue::from_static("no"));
    headers.insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-cache"),
    );
    Ok(response)
}
