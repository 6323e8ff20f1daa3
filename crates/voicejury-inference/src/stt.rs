//! Speech-to-text client with 3-tier fallback
//!
//! Tier 1: shared STT HTTP service (dedicated GPU, word timestamps, VAD
//! pre-filter). Tier 2: public API provider, OpenAI-compatible audio
//! endpoint. Tier 3: locally embedded engine, disabled by default — a slot
//! a deployment can plug an [`SttClient`] into.
//!
//! Every tier failing surfaces `UpstreamUnavailable`; the pipeline retries
//! that with jittered backoff and eventually degrades to an empty
//! transcription.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use voicejury_core::clients::{SttClient, SttOutcome};
use voicejury_core::{Error, Result, Transcription, Word};

/// Provenance tags recorded with the transcription.
pub const PROVENANCE_SHARED: &str = "whisper_timestamped";
pub const PROVENANCE_PUBLIC_API: &str = "groq_whisper";
pub const PROVENANCE_LOCAL: &str = "whisper_local";

/// One fallback tier.
pub enum SttTier {
    /// Shared inference service dedicated to STT.
    SharedService { base_url: String },
    /// Public API provider (free tier, OpenAI-compatible endpoint).
    PublicApi { base_url: String, api_key: String },
    /// Locally embedded engine. `None` keeps the tier disabled.
    Local { engine: Option<Arc<dyn SttClient>> },
}

impl SttTier {
    fn name(&self) -> &'static str {
        match self {
            SttTier::SharedService { .. } => "shared-stt",
            SttTier::PublicApi { .. } => "public-api",
            SttTier::Local { .. } => "local",
        }
    }
}

pub struct TieredSttClient {
    client: Client,
    tiers: Vec<SttTier>,
}

impl TieredSttClient {
    pub fn new(client: Client, tiers: Vec<SttTier>) -> Self {
        Self { client, tiers }
    }

    async fn transcribe_shared(
        &self,
        base_url: &str,
        vocals: &Path,
        language: &str,
        prompt: Option<&str>,
    ) -> Result<Transcription> {
        let data = tokio::fs::read(vocals).await?;
        let file_name = file_name_of(vocals);

        let mut query = vec![
            ("language", language.to_string()),
            ("output", "json".to_string()),
            ("task", "transcribe".to_string()),
            ("word_timestamps", "true".to_string()),
            // VAD pre-filter skips silence before GPU inference
            ("vad_filter", "true".to_string()),
        ];
        if let Some(prompt) = prompt {
            query.push(("initial_prompt", prompt.to_string()));
        }

        let form = reqwest::multipart::Form::new().part(
            "audio_file",
            reqwest::multipart::Part::bytes(data).file_name(file_name),
        );
        let resp = self
            .client
            .post(format!("{}/asr", base_url.trim_end_matches('/')))
            .query(&query)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("shared stt: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "shared stt: status {}",
                resp.status()
            )));
        }

        #[derive(Deserialize)]
        struct AsrWord {
            #[serde(default)]
            word: String,
            #[serde(default)]
            start: f64,
            #[serde(default)]
            end: f64,
            #[serde(default = "default_confidence")]
            probability: f64,
        }
        #[derive(Deserialize)]
        struct AsrSegment {
            #[serde(default)]
            words: Vec<AsrWord>,
        }
        #[derive(Deserialize)]
        struct AsrResponse {
            #[serde(default)]
            text: String,
            #[serde(default)]
            language: Option<String>,
            #[serde(default)]
            segments: Vec<AsrSegment>,
        }

        let body: AsrResponse = resp
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("shared stt response: {}", e)))?;

        let words = body
            .segments
            .into_iter()
            .flat_map(|s| s.words)
            .map(|w| Word {
                word: w.word.trim().to_string(),
                start_ms: (w.start * 1000.0) as u64,
                end_ms: (w.end * 1000.0) as u64,
                confidence: w.probability as f32,
            })
            .collect();

        Ok(Transcription {
            text: body.text,
            language: body.language.unwrap_or_else(|| language.to_string()),
            words,
        })
    }

    async fn transcribe_public_api(
        &self,
        base_url: &str,
        api_key: &str,
        vocals: &Path,
        language: &str,
        prompt: Option<&str>,
    ) -> Result<Transcription> {
        let data = tokio::fs::read(vocals).await?;
        let file_name = file_name_of(vocals);

        let mut form = reqwest::multipart::Form::new()
            .text("model", "whisper-large-v3-turbo")
            .text("language", language.to_string())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "word")
            .part(
                "file",
                reqwest::multipart::Part::bytes(data).file_name(file_name),
            );
        if let Some(prompt) = prompt {
            form = form.text("prompt", prompt.to_string());
        }

        let resp = self
            .client
            .post(format!(
                "{}/openai/v1/audio/transcriptions",
                base_url.trim_end_matches('/')
            ))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("public stt api: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "public stt api: status {}",
                resp.status()
            )));
        }

        #[derive(Deserialize)]
        struct ApiWord {
            #[serde(default)]
            word: String,
            #[serde(default)]
            start: f64,
            #[serde(default)]
            end: f64,
        }
        #[derive(Deserialize)]
        struct ApiResponse {
            #[serde(default)]
            text: String,
            #[serde(default)]
            language: Option<String>,
            #[serde(default)]
            words: Vec<ApiWord>,
        }

        let body: ApiResponse = resp
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("public stt response: {}", e)))?;

        let words = body
            .words
            .into_iter()
            .map(|w| Word {
                word: w.word.trim().to_string(),
                start_ms: (w.start * 1000.0) as u64,
                end_ms: (w.end * 1000.0) as u64,
                // This provider reports no per-word confidence
                confidence: 1.0,
            })
            .collect();

        Ok(Transcription {
            text: body.text,
            language: body.language.unwrap_or_else(|| language.to_string()),
            words,
        })
    }
}

fn default_confidence() -> f64 {
    1.0
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "vocals.wav".to_string())
}

#[async_trait]
impl SttClient for TieredSttClient {
    async fn transcribe(
        &self,
        vocals: &Path,
        language: &str,
        prompt: Option<&str>,
    ) -> Result<SttOutcome> {
        let mut failures = Vec::new();

        for tier in &self.tiers {
            let result = match tier {
                SttTier::SharedService { base_url } => self
                    .transcribe_shared(base_url, vocals, language, prompt)
                    .await
                    .map(|t| SttOutcome {
                        transcription: t,
                        provenance: PROVENANCE_SHARED.to_string(),
                    }),
                SttTier::PublicApi { base_url, api_key } => self
                    .transcribe_public_api(base_url, api_key, vocals, language, prompt)
                    .await
                    .map(|t| SttOutcome {
                        transcription: t,
                        provenance: PROVENANCE_PUBLIC_API.to_string(),
                    }),
                SttTier::Local { engine: None } => {
                    failures.push("local: disabled".to_string());
                    continue;
                }
                SttTier::Local {
                    engine: Some(engine),
                } => engine
                    .transcribe(vocals, language, prompt)
                    .await
                    .map(|outcome| SttOutcome {
                        transcription: outcome.transcription,
                        provenance: PROVENANCE_LOCAL.to_string(),
                    }),
            };

            match result {
                Ok(outcome) => {
                    info!(
                        tier = tier.name(),
                        words = outcome.transcription.words.len(),
                        "transcription complete"
                    );
                    return Ok(outcome);
                }
                Err(e) => {
                    warn!(tier = tier.name(), error = %e, "stt tier failed");
                    failures.push(format!("{}: {}", tier.name(), e));
                }
            }
        }

        Err(Error::UpstreamUnavailable(format!(
            "all stt tiers failed: {}",
            failures.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn vocals_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let p = dir.path().join("vocals.wav");
        std::fs::write(&p, b"RIFF").unwrap();
        p
    }

    fn shared_body() -> serde_json::Value {
        serde_json::json!({
            "text": "bonjour le monde",
            "language": "fr",
            "segments": [{
                "words": [
                    {"word": " bonjour", "start": 0.0, "end": 0.45, "probability": 0.97},
                    {"word": " le", "start": 0.5, "end": 0.6, "probability": 0.92},
                    {"word": " monde", "start": 0.65, "end": 1.1, "probability": 0.95},
                ]
            }]
        })
    }

    #[tokio::test]
    async fn tier1_success_with_word_timestamps() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/asr"))
            .and(query_param("word_timestamps", "true"))
            .and(query_param("vad_filter", "true"))
            .and(query_param("language", "fr"))
            .respond_with(ResponseTemplate::new(200).set_body_json(shared_body()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = TieredSttClient::new(
            Client::new(),
            vec![SttTier::SharedService {
                base_url: server.uri(),
            }],
        );
        let outcome = client
            .transcribe(&vocals_file(&dir), "fr", None)
            .await
            .unwrap();
        assert_eq!(outcome.provenance, PROVENANCE_SHARED);
        assert_eq!(outcome.transcription.words.len(), 3);
        assert_eq!(outcome.transcription.words[0].word, "bonjour");
        assert_eq!(outcome.transcription.words[0].end_ms, 450);
    }

    #[tokio::test]
    async fn tier1_outage_falls_through_to_public_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/asr"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/openai/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "bonjour",
                "language": "fr",
                "words": [{"word": "bonjour", "start": 0.0, "end": 0.5}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = TieredSttClient::new(
            Client::new(),
            vec![
                SttTier::SharedService {
                    base_url: server.uri(),
                },
                SttTier::PublicApi {
                    base_url: server.uri(),
                    api_key: "gsk-test".to_string(),
                },
            ],
        );
        let outcome = client
            .transcribe(&vocals_file(&dir), "fr", Some("paroles attendues"))
            .await
            .unwrap();
        assert_eq!(outcome.provenance, PROVENANCE_PUBLIC_API);
        assert_eq!(outcome.transcription.words[0].confidence, 1.0);
    }

    #[tokio::test]
    async fn disabled_local_tier_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let client = TieredSttClient::new(Client::new(), vec![SttTier::Local { engine: None }]);
        let err = client
            .transcribe(&vocals_file(&dir), "fr", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)));
        assert!(err.to_string().contains("disabled"));
    }

    #[tokio::test]
    async fn all_tiers_down_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/asr"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/openai/v1/audio/transcriptions"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = TieredSttClient::new(
            Client::new(),
            vec![
                SttTier::SharedService {
                    base_url: server.uri(),
                },
                SttTier::PublicApi {
                    base_url: server.uri(),
                    api_key: "gsk".to_string(),
                },
                SttTier::Local { engine: None },
            ],
        );
        let err = client
            .transcribe(&vocals_file(&dir), "fr", None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
