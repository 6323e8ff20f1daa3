//! GPU co-tenant coordinator
//!
//! The heavy GPU is time-shared with a co-tenant LLM server. Before work
//! that needs more than ~3 GB of device memory, the coordinator asks the
//! co-tenant to unload by issuing a generate call with `keep_alive: 0`;
//! the co-tenant reloads lazily on its next real request.
//!
//! Strictly advisory: a failed unload never blocks the pipeline, it is
//! only remembered so downstream steps can pick a smaller batch.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use voicejury_core::clients::GpuGate;

pub struct GpuCoordinator {
    client: Client,
    cotenant_url: String,
    cotenant_model: String,
    unload_timeout: Duration,
    last_unload_ok: AtomicBool,
}

impl GpuCoordinator {
    pub fn new(client: Client, cotenant_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            cotenant_url: cotenant_url.into().trim_end_matches('/').to_string(),
            cotenant_model: model.into(),
            unload_timeout: Duration::from_secs(15),
            last_unload_ok: AtomicBool::new(false),
        }
    }

    /// Outcome of the most recent unload request. Consulted by callers to
    /// decide whether the full batch size is safe.
    pub fn last_unload_succeeded(&self) -> bool {
        self.last_unload_ok.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl GpuGate for GpuCoordinator {
    async fn request_exclusive(&self) -> bool {
        let result = self
            .client
            .post(format!("{}/api/generate", self.cotenant_url))
            .json(&serde_json::json!({
                "model": self.cotenant_model,
                "prompt": "",
                "keep_alive": 0,
            }))
            .timeout(self.unload_timeout)
            .send()
            .await;

        let ok = matches!(&result, Ok(resp) if resp.status().is_success());
        self.last_unload_ok.store(ok, Ordering::Relaxed);
        if ok {
            info!(cotenant = %self.cotenant_url, "co-tenant unload acknowledged");
        } else {
            warn!(
                cotenant = %self.cotenant_url,
                "co-tenant unload failed; continuing with reduced headroom"
            );
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn unload_posts_zero_keep_alive() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_string_contains("\"keep_alive\":0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let gate = GpuCoordinator::new(Client::new(), server.uri(), "qwen3:4b");
        assert!(gate.request_exclusive().await);
        assert!(gate.last_unload_succeeded());
    }

    #[tokio::test]
    async fn unload_failure_is_recorded_but_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let gate = GpuCoordinator::new(Client::new(), server.uri(), "qwen3:4b");
        // Always returns — never errors, never blocks
        assert!(!gate.request_exclusive().await);
        assert!(!gate.last_unload_succeeded());
    }

    #[tokio::test]
    async fn unreachable_cotenant_is_not_fatal() {
        let gate = GpuCoordinator::new(
            Client::new(),
            "http://127.0.0.1:1", // nothing listens here
            "qwen3:4b",
        );
        assert!(!gate.request_exclusive().await);
    }
}
