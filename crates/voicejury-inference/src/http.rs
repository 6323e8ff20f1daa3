//! Shared HTTP client utilities for the inference services

use reqwest::{Client, ClientBuilder};
use std::time::Duration;
use tracing::{debug, warn};

use voicejury_core::{Error, Result};

/// HTTP client configuration shared by the inference clients.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Whole-request timeout. Inference calls block until the model is
    /// done, so this is minutes, not seconds.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub pool_max_idle_per_host: usize,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            connect_timeout_secs: 10,
            pool_max_idle_per_host: 8,
            user_agent: format!("VoiceJury/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Create a pooled client for inference traffic.
pub fn create_client(config: &HttpClientConfig) -> Result<Client> {
    ClientBuilder::new()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        // Expire idle connections before upstream servers close them.
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .user_agent(&config.user_agent)
        .build()
        .map_err(|e| Error::Fatal(format!("failed to build inference client: {}", e)))
}

/// Retry `operation` on retryable errors with exponential backoff
/// (`base × 2ⁿ`). `max_retries` counts retries, not attempts.
pub async fn with_retry<F, Fut, T>(max_retries: u32, base: Duration, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = base * 2u32.pow(attempt - 1);
            debug!(
                backoff_ms = backoff.as_millis() as u64,
                attempt, max_retries, "retrying inference call"
            );
            tokio::time::sleep(backoff).await;
        }

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                warn!(attempt = attempt + 1, max_retries, error = %e, "inference call failed");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error
        .unwrap_or_else(|| Error::Fatal("retry loop exited unexpectedly".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn client_builds_with_defaults() {
        let config = HttpClientConfig::default();
        assert!(create_client(&config).is_ok());
    }

    #[tokio::test]
    async fn retry_succeeds_first_attempt() {
        let result = with_retry(3, Duration::from_millis(1), || async { Ok::<_, Error>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry(3, Duration::from_millis(1), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::UpstreamUnavailable("503".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_stops_on_fatal_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<i32> = with_retry(3, Duration::from_millis(1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::CorruptAudio("bad wav".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
