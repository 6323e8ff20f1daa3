//! Blob store HTTP client
//!
//! Typed wrapper over the HTTP object store. One instance per process: the
//! backing store limits total processes, so every operation goes through a
//! single pooled client and an in-flight permit that bounds concurrent
//! connections.
//!
//! Wire shape:
//! - `POST {base}/api/upload.php` — bearer auth, `X-File-Path` header, raw body
//! - `POST {base}/api/delete.php` — JSON body `{"path": "bucket/key"}`
//! - `GET  {base}/files/{bucket}/{key}` — public URL, used for reads and HEAD

use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Client, ClientBuilder, StatusCode};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use voicejury_core::{Error, Result};

/// Retryable upload statuses.
const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

const DOWNLOAD_CHUNK_LOG_EVERY: usize = 64;

/// Blob store client configuration.
#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    /// Base URL of the store, e.g. `https://storages.example.com`.
    pub base_url: String,
    pub api_key: String,
    pub bucket: String,

    /// Total in-flight request bound (the store caps backend processes).
    pub max_connections: usize,
    /// Keep-alive connections retained in the pool.
    pub max_keepalive: usize,

    pub upload_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub exists_timeout_secs: u64,
    pub delete_timeout_secs: u64,

    /// Upload attempts including the first try.
    pub upload_attempts: u32,
    /// Base backoff between upload attempts; doubles each retry.
    pub backoff_base: Duration,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            api_key: String::new(),
            bucket: "voicejury".to_string(),
            max_connections: 10,
            max_keepalive: 5,
            upload_timeout_secs: 120,
            download_timeout_secs: 180,
            exists_timeout_secs: 5,
            delete_timeout_secs: 10,
            upload_attempts: 3,
            backoff_base: Duration::from_millis(1500),
        }
    }
}

/// Pooled blob store client.
pub struct BlobStore {
    client: Client,
    config: BlobStoreConfig,
    /// Bounds concurrent requests across uploads, downloads, HEADs and
    /// deletes — the pool is shared, opening a connection per call is not
    /// an option here.
    permits: Semaphore,
}

impl BlobStore {
    pub fn new(mut config: BlobStoreConfig) -> Result<Self> {
        config.base_url = normalize_base_url(&config.base_url);

        let client = ClientBuilder::new()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(config.max_keepalive)
            // Expire idle connections before the store closes them on its
            // side, otherwise requests hang on dead pooled sockets.
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Fatal(format!("failed to build blob store client: {}", e)))?;

        let key_fp = if config.api_key.is_empty() {
            "missing".to_string()
        } else {
            let digest = Sha256::digest(config.api_key.as_bytes());
            format!("{:x}", digest)[..10].to_string()
        };
        info!(
            base_url = %config.base_url,
            bucket = %config.bucket,
            api_key_fp = %key_fp,
            pool = format!("{}/{}", config.max_keepalive, config.max_connections),
            "blob store client configured"
        );

        let permits = Semaphore::new(config.max_connections);
        Ok(Self {
            client,
            config,
            permits,
        })
    }

    /// Public URL for a key. Full storage URLs pass through unchanged.
    pub fn public_url(&self, key: &str) -> String {
        if is_url(key) {
            return key.to_string();
        }
        format!("{}/files/{}", self.config.base_url, self.storage_path(key))
    }

    /// Full `bucket/key` path.
    fn storage_path(&self, key: &str) -> String {
        if key.starts_with(&format!("{}/", self.config.bucket)) {
            key.to_string()
        } else {
            format!("{}/{}", self.config.bucket, key)
        }
    }

    /// Upload raw bytes. Retries transient failures with exponential
    /// backoff; surfaces `UpstreamUnavailable` once attempts are exhausted.
    ///
    /// Returns the public URL of the uploaded object.
    pub async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<String> {
        let full_path = self.storage_path(key);
        let endpoint = format!("{}/api/upload.php", self.config.base_url);
        let attempts = self.config.upload_attempts.max(1);

        let mut last_err = String::new();
        for attempt in 1..=attempts {
            if attempt > 1 {
                let backoff = self.config.backoff_base * 2u32.pow(attempt - 2);
                warn!(
                    path = %full_path,
                    attempt,
                    attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    "blob upload retry"
                );
                tokio::time::sleep(backoff).await;
            }

            let _permit = self.acquire().await?;
            debug!(path = %full_path, bytes = data.len(), attempt, "blob upload");

            let response = self
                .client
                .post(&endpoint)
                .bearer_auth(&self.config.api_key)
                .header("Content-Type", content_type)
                .header("X-File-Path", &full_path)
                .timeout(Duration::from_secs(self.config.upload_timeout_secs))
                .body(data.clone())
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        // The store answers with {"url": ...}; fall back to
                        // the derived public URL when the body is opaque.
                        let url = resp
                            .json::<serde_json::Value>()
                            .await
                            .ok()
                            .and_then(|v| v.get("url").and_then(|u| u.as_str().map(String::from)))
                            .unwrap_or_else(|| self.public_url(key));
                        info!(path = %full_path, bytes = data.len(), "blob upload ok");
                        return Ok(url);
                    }
                    if !RETRYABLE_STATUS.contains(&status.as_u16()) {
                        return Err(Error::UpstreamUnavailable(format!(
                            "blob upload failed for {}: status {}",
                            full_path, status
                        )));
                    }
                    last_err = format!("status {}", status);
                }
                Err(e) => {
                    last_err = e.to_string();
                }
            }
        }

        Err(Error::UpstreamUnavailable(format!(
            "blob upload failed for {} after {} attempts: {}",
            full_path, attempts, last_err
        )))
    }

    /// Upload a local file.
    pub async fn put_file(&self, local: &Path, key: &str, content_type: &str) -> Result<String> {
        debug!(local = %local.display(), key, "blob upload from file");
        let data = tokio::fs::read(local).await?;
        self.put(key, Bytes::from(data), content_type).await
    }

    /// Download an object into memory.
    ///
    /// Distinguishes `NotFound` (404) from `UpstreamUnavailable`.
    pub async fn get(&self, key: &str) -> Result<Bytes> {
        let url = self.public_url(key);
        let _permit = self.acquire().await?;

        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(self.config.download_timeout_secs))
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("blob download {}: {}", key, e)))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("blob {}", key))),
            status if status.is_success() => {
                let bytes = resp.bytes().await.map_err(|e| {
                    Error::UpstreamUnavailable(format!("blob download {}: {}", key, e))
                })?;
                debug!(key, bytes = bytes.len(), "blob download ok");
                Ok(bytes)
            }
            status => Err(Error::UpstreamUnavailable(format!(
                "blob download {}: status {}",
                key, status
            ))),
        }
    }

    /// Stream an object to a local file, creating parent directories.
    pub async fn get_to_file(&self, key: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let url = self.public_url(key);
        let _permit = self.acquire().await?;

        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(self.config.download_timeout_secs))
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("blob download {}: {}", key, e)))?;

        match resp.status() {
            StatusCode::NOT_FOUND => return Err(Error::NotFound(format!("blob {}", key))),
            status if !status.is_success() => {
                return Err(Error::UpstreamUnavailable(format!(
                    "blob download {}: status {}",
                    key, status
                )));
            }
            _ => {}
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        let mut chunks = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| Error::UpstreamUnavailable(format!("blob stream {}: {}", key, e)))?;
            file.write_all(&chunk).await?;
            chunks += 1;
            if chunks % DOWNLOAD_CHUNK_LOG_EVERY == 0 {
                debug!(key, chunks, "blob download streaming");
            }
        }
        file.flush().await?;
        info!(key, dest = %dest.display(), "blob download to file ok");
        Ok(())
    }

    /// HEAD-based existence probe. A hint, not a guarantee: any error
    /// reads as "absent".
    pub async fn exists(&self, key: &str) -> bool {
        let url = self.public_url(key);
        let permit = match self.acquire().await {
            Ok(p) => p,
            Err(_) => return false,
        };
        let result = self
            .client
            .head(&url)
            .timeout(Duration::from_secs(self.config.exists_timeout_secs))
            .send()
            .await;
        drop(permit);
        matches!(result, Ok(resp) if resp.status() == StatusCode::OK)
    }

    /// Best-effort delete; never surfaces an error to callers.
    pub async fn delete(&self, key: &str) {
        let full_path = self.storage_path(key);
        let endpoint = format!("{}/api/delete.php", self.config.base_url);
        let permit = match self.acquire().await {
            Ok(p) => p,
            Err(_) => return,
        };

        let result = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({ "path": full_path }))
            .timeout(Duration::from_secs(self.config.delete_timeout_secs))
            .send()
            .await;
        drop(permit);

        match result {
            Ok(resp) if matches!(resp.status().as_u16(), 200 | 204 | 404) => {
                debug!(path = %full_path, "blob delete ok");
            }
            Ok(resp) => {
                warn!(path = %full_path, status = %resp.status(), "blob delete failed");
            }
            Err(e) => {
                warn!(path = %full_path, error = %e, "blob delete failed");
            }
        }
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.permits
            .acquire()
            .await
            .map_err(|_| Error::Fatal("blob store connection pool closed".to_string()))
    }
}

fn is_url(path_or_key: &str) -> bool {
    path_or_key.starts_with("http://") || path_or_key.starts_with("https://")
}

fn normalize_base_url(raw: &str) -> String {
    let mut url = raw.trim_end_matches('/').to_string();
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }
    url
}
