//! Deterministic blob-store path derivation
//!
//! Every artifact location is a pure function of the reference-video
//! fingerprint or the session id; no index is kept anywhere. Paths are
//! relative to the bucket — the storage client prepends `{bucket}/`.
//!
//! Shared reference artifacts live under `cache/{ref_id}/` and survive
//! session cleanup. Session-scoped copies live under `sessions/` and are
//! reaped two hours after session creation.

/// Reference original, as published by source acquisition.
pub fn reference_original(ref_id: &str, ext: &str) -> String {
    format!("cache/{}/reference.{}", ref_id, ext)
}

pub fn reference_vocals(ref_id: &str) -> String {
    format!("cache/{}/vocals.wav", ref_id)
}

pub fn reference_instrumentals(ref_id: &str) -> String {
    format!("cache/{}/instrumentals.wav", ref_id)
}

/// Reference pitch artifact (NPZ).
pub fn reference_pitch(ref_id: &str) -> String {
    format!("cache/{}/pitch_data.npz", ref_id)
}

/// 20 Hz RMS amplitude envelope of the reference vocals.
pub fn flow_envelope(ref_id: &str) -> String {
    format!("cache/{}/flow_envelope.json", ref_id)
}

/// User upload. `ext` is `webm` or `wav` depending on what the browser sent.
pub fn user_recording(session_id: &str, ext: &str) -> String {
    format!("sessions/{}/user_recording.{}", session_id, ext)
}

pub fn user_vocals(session_id: &str) -> String {
    format!("sessions/{}_user/vocals.wav", session_id)
}

pub fn user_instrumentals(session_id: &str) -> String {
    format!("sessions/{}_user/instrumentals.wav", session_id)
}

/// Session-scoped copy of the reference vocals, advertised to the client
/// for multi-track playback.
pub fn session_reference_vocals(session_id: &str) -> String {
    format!("sessions/{}_ref/vocals.wav", session_id)
}

pub fn session_reference_instrumentals(session_id: &str) -> String {
    format!("sessions/{}_ref/instrumentals.wav", session_id)
}

/// All session-derived blob paths the reaper deletes. The per-fingerprint
/// `cache/` paths are deliberately absent.
pub fn session_blob_paths(session_id: &str) -> Vec<String> {
    vec![
        user_recording(session_id, "webm"),
        user_recording(session_id, "wav"),
        user_vocals(session_id),
        user_instrumentals(session_id),
        session_reference_vocals(session_id),
        session_reference_instrumentals(session_id),
    ]
}

/// Dedicated key signalling reference stems are playable. Lives beside the
/// session record (never inside it) so readiness cannot race a field merge.
pub fn tracks_ready_key(session_id: &str) -> String {
    format!("session:{}:tracks_ready_at", session_id)
}

/// Dedicated key signalling the user's separated stems are playable.
pub fn user_tracks_ready_key(session_id: &str) -> String {
    format!("session:{}:user_tracks_ready_at", session_id)
}
