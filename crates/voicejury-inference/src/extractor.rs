//! Media extractor client
//!
//! Wraps the external audio extractor that pulls the audio track of a
//! source video into a lossless compressed container. The engine only ever
//! sees a local file path.

use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;

use voicejury_core::clients::MediaExtractor;
use voicejury_core::{Error, Result};

pub struct HttpMediaExtractor {
    client: Client,
    base_url: String,
}

impl HttpMediaExtractor {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MediaExtractor for HttpMediaExtractor {
    async fn download_audio(&self, source_url: &str, dest_dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dest_dir).await?;

        let resp = self
            .client
            .post(format!("{}/extract_audio", self.base_url))
            .json(&serde_json::json!({ "url": source_url, "format": "flac" }))
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("media extractor: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "media extractor: status {}",
                resp.status()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("media extractor: {}", e)))?;

        let dest = dest_dir.join("reference.flac");
        let mut file = tokio::fs::File::create(&dest).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;

        info!(source_url, dest = %dest.display(), bytes = bytes.len(), "reference audio extracted");
        Ok(dest)
    }
}
