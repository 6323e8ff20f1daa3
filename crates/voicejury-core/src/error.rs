//! Error types for VoiceJury Core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Corrupt artifact: {0}")]
    Integrity(String),

    // Source-separation failure classes
    #[error("GPU unavailable: {0}")]
    GpuUnavailable(String),

    #[error("Corrupt audio input: {0}")]
    CorruptAudio(String),

    // Infrastructure errors
    #[error("Session store error: {0}")]
    SessionStore(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Whether a retry at the same tier has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::UpstreamUnavailable(_) | Error::GpuUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
