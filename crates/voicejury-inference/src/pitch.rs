//! Pitch extraction client
//!
//! Wraps the CREPE-style pitch service on the secondary GPU. The service
//! answers with an NPZ artifact; the client parses and validates it before
//! handing a [`PitchContour`] to the pipeline.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::path::Path;
use tracing::{debug, info};

use voicejury_core::clients::{PitchClient, PitchMode};
use voicejury_core::{Error, PitchContour, Result};

pub struct HttpPitchClient {
    client: Client,
    base_url: String,
}

impl HttpPitchClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Model name on the wire: the service only knows `tiny` and `full`.
    fn model_param(mode: PitchMode) -> &'static str {
        match mode {
            PitchMode::Fast => "tiny",
            PitchMode::Accurate => "full",
        }
    }
}

#[async_trait]
impl PitchClient for HttpPitchClient {
    async fn extract(&self, vocals: &Path, mode: PitchMode) -> Result<PitchContour> {
        let data = tokio::fs::read(vocals).await?;
        let file_name = vocals
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "vocals.wav".to_string());
        debug!(vocals = %vocals.display(), mode = mode.as_str(), "pitch extraction request");

        let form = reqwest::multipart::Form::new().part(
            "audio_file",
            reqwest::multipart::Part::bytes(data).file_name(file_name),
        );
        let resp = self
            .client
            .post(format!("{}/extract", self.base_url))
            .query(&[("model", Self::model_param(mode))])
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("pitch service: {}", e)))?;

        match resp.status() {
            status if status.is_success() => {
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| Error::UpstreamUnavailable(format!("pitch response: {}", e)))?;
                let contour = PitchContour::from_npz_bytes(&bytes)?;
                info!(
                    frames = contour.len(),
                    voiced = contour.voiced_frames(),
                    mode = mode.as_str(),
                    "pitch extraction complete"
                );
                Ok(contour)
            }
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::TOO_MANY_REQUESTS => Err(
                Error::UpstreamUnavailable(format!("pitch service busy: {}", resp.status())),
            ),
            status => Err(Error::UpstreamUnavailable(format!(
                "pitch extraction failed: status {}",
                status
            ))),
        }
    }
}
