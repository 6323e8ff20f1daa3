//! Source separation client
//!
//! Wraps the heavy-GPU separation service. Input is a local recording or a
//! downloadable URL; output is two 44.1 kHz stereo WAV stems staged into
//! the caller's working directory.
//!
//! Failure classes matter here: a busy or OOM GPU is retryable
//! (`GpuUnavailable`), an undecodable input is not (`CorruptAudio`).

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use voicejury_core::clients::{SeparationClient, SeparationInput, StemPair};
use voicejury_core::{Error, Result};

#[derive(Debug, Deserialize)]
struct SeparateResponse {
    vocals_url: String,
    instrumentals_url: String,
}

pub struct HttpSeparationClient {
    client: Client,
    base_url: String,
}

impl HttpSeparationClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn request_separation(&self, input: &SeparationInput) -> Result<SeparateResponse> {
        let endpoint = format!("{}/separate", self.base_url);
        let request = match input {
            SeparationInput::RemoteUrl(url) => self
                .client
                .post(&endpoint)
                .json(&serde_json::json!({ "source_url": url })),
            SeparationInput::LocalFile(path) => {
                let data = tokio::fs::read(path).await?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "recording".to_string());
                let form = reqwest::multipart::Form::new().part(
                    "audio_file",
                    reqwest::multipart::Part::bytes(data).file_name(file_name),
                );
                self.client.post(&endpoint).multipart(form)
            }
        };

        let resp = request
            .send()
            .await
            .map_err(|e| Error::GpuUnavailable(format!("separation service: {}", e)))?;

        match resp.status() {
            status if status.is_success() => resp
                .json::<SeparateResponse>()
                .await
                .map_err(|e| Error::UpstreamUnavailable(format!("separation response: {}", e))),
            StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => Err(Error::CorruptAudio(
                format!("separation rejected input: status {}", resp.status()),
            )),
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::TOO_MANY_REQUESTS => Err(
                Error::GpuUnavailable(format!("separation busy: status {}", resp.status())),
            ),
            status => Err(Error::UpstreamUnavailable(format!(
                "separation failed: status {}",
                status
            ))),
        }
    }

    async fn download_stem(&self, url: &str, dest: &Path) -> Result<()> {
        debug!(url, dest = %dest.display(), "downloading stem");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("stem download: {}", e)))?;
        if !resp.status().is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "stem download {}: status {}",
                url,
                resp.status()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("stem download: {}", e)))?;
        let mut file = tokio::fs::File::create(dest).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl SeparationClient for HttpSeparationClient {
    async fn separate(&self, input: &SeparationInput, workdir: &Path) -> Result<StemPair> {
        tokio::fs::create_dir_all(workdir).await?;
        let response = self.request_separation(input).await?;

        let vocals: PathBuf = workdir.join("vocals.wav");
        let instrumentals: PathBuf = workdir.join("instrumentals.wav");
        self.download_stem(&response.vocals_url, &vocals).await?;
        self.download_stem(&response.instrumentals_url, &instrumentals)
            .await?;

        info!(workdir = %workdir.display(), "separation complete");
        Ok(StemPair {
            vocals,
            instrumentals,
        })
    }
}
