//! Jury commentary generation
//!
//! Three personas comment on every performance. Generation is tiered:
//! a high-quality LLM through the proxy (two attempts with backoff), a
//! smaller LLM through the same proxy, and finally a hard-coded
//! persona-specific heuristic keyed on the score band. The heuristic never
//! fails, so neither does this client.
//!
//! Reasoning models leak `<think>…</think>` blocks — sometimes unclosed
//! when the response was token-truncated — and those are stripped before
//! the comment reaches a client.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use voicejury_core::clients::{JudgeClient, Persona};
use voicejury_core::{Error, JudgeComment, Result, ScoreSummary, Vote};

pub use voicejury_core::clients::default_personas;

/// LLM tiers tried in order before the heuristic.
#[derive(Debug, Clone)]
pub struct JudgeModelConfig {
    pub base_url: String,
    /// High-quality model, two attempts with backoff.
    pub primary_model: String,
    /// Smaller fallback model on the same proxy.
    pub secondary_model: String,
    /// Attempts per LLM tier.
    pub attempts: u32,
    /// Backoff base between attempts (doubles per retry).
    pub backoff_base: Duration,
}

impl Default for JudgeModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            primary_model: "qwen3:4b".to_string(),
            secondary_model: "qwen2.5:1.5b".to_string(),
            attempts: 2,
            backoff_base: Duration::from_secs(1),
        }
    }
}

pub struct LlmJudgeClient {
    client: Client,
    config: JudgeModelConfig,
}

impl LlmJudgeClient {
    pub fn new(client: Client, config: JudgeModelConfig) -> Self {
        Self { client, config }
    }

    fn build_prompt(persona: &Persona, scores: &ScoreSummary, track_title: &str) -> String {
        let mut issues = Vec::new();
        let mut strengths = Vec::new();
        for (label, strong_label, value) in [
            ("Justesse (faux)", "Justesse", scores.pitch),
            ("Rythme (décalé)", "Rythme", scores.rhythm),
            ("Paroles (oubliées)", "Connaissance des paroles", scores.lyrics),
        ] {
            if value < 60.0 {
                issues.push(label);
            } else if value > 80.0 {
                strengths.push(strong_label);
            }
        }

        format!(
            "Tu es \"{name}\", un jury d'un concours de chant type \"Incroyable Talent\".\n\
             Style: {style}\n\n\
             CONTEXTE:\n\
             - Chanson: \"{title}\"\n\
             - Score global: {overall}/100\n\
             - Justesse: {pitch}%\n\
             - Rythme: {rhythm}%\n\
             - Paroles: {lyrics}%\n\
             - Problèmes: {issues}\n\
             - Points forts: {strengths}\n\n\
             TÂCHE: Écris UN commentaire de 2-3 phrases pour le candidat. \
             Sois fidèle à ton personnage.\n\
             Réponds UNIQUEMENT avec le commentaire, sans préfixe.",
            name = persona.name,
            style = persona.style,
            title = track_title,
            overall = scores.overall,
            pitch = scores.pitch,
            rhythm = scores.rhythm,
            lyrics = scores.lyrics,
            issues = if issues.is_empty() {
                "Aucun majeur".to_string()
            } else {
                issues.join(", ")
            },
            strengths = if strengths.is_empty() {
                "À développer".to_string()
            } else {
                strengths.join(", ")
            },
        )
    }

    async fn generate_once(&self, model: &str, prompt: &str) -> Result<String> {
        let resp = self
            .client
            .post(format!(
                "{}/api/generate",
                self.config.base_url.trim_end_matches('/')
            ))
            .json(&serde_json::json!({
                "model": model,
                "prompt": prompt,
                "stream": false,
                "options": {"temperature": 0.8, "top_p": 0.9},
            }))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("judge llm: {}", e)))?;

        if !resp.status().is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "judge llm: status {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("judge llm response: {}", e)))?;
        let raw = body
            .get("response")
            .and_then(|r| r.as_str())
            .unwrap_or_default();
        let comment = strip_think_blocks(raw);
        if comment.is_empty() {
            return Err(Error::UpstreamUnavailable(
                "judge llm returned empty comment".to_string(),
            ));
        }
        Ok(comment)
    }

    async fn generate_with_attempts(&self, model: &str, prompt: &str) -> Result<String> {
        let mut last_err = None;
        for attempt in 0..self.config.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.config.backoff_base * 2u32.pow(attempt - 1)).await;
            }
            match self.generate_once(model, prompt).await {
                Ok(comment) => return Ok(comment),
                Err(e) => {
                    warn!(model, attempt = attempt + 1, error = %e, "judge generation failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Fatal("judge attempts exhausted".to_string())))
    }
}

#[async_trait]
impl JudgeClient for LlmJudgeClient {
    async fn comment(
        &self,
        persona: &Persona,
        scores: &ScoreSummary,
        track_title: &str,
    ) -> JudgeComment {
        let prompt = Self::build_prompt(persona, scores, track_title);
        let vote = if scores.overall >= persona.yes_threshold {
            Vote::Yes
        } else {
            Vote::No
        };
        let started = Instant::now();

        for model in [&self.config.primary_model, &self.config.secondary_model] {
            match self.generate_with_attempts(model, &prompt).await {
                Ok(comment) => {
                    info!(persona = %persona.name, model, "judge comment generated");
                    return JudgeComment {
                        persona: persona.name.clone(),
                        comment,
                        vote,
                        model: model.clone(),
                        latency_ms: started.elapsed().as_millis() as u64,
                    };
                }
                Err(e) => warn!(persona = %persona.name, model, error = %e, "judge tier failed"),
            }
        }

        // Last tier never fails.
        JudgeComment {
            persona: persona.name.clone(),
            comment: heuristic_comment(&persona.name, scores.overall),
            vote,
            model: "heuristic".to_string(),
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }
}

static THINK_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());
static THINK_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<think>.*$").unwrap());

/// Remove `<think>…</think>` markup, including an unclosed opener left by
/// token truncation.
pub fn strip_think_blocks(raw: &str) -> String {
    let stripped = THINK_BLOCK.replace_all(raw, "");
    let stripped = THINK_OPEN.replace_all(&stripped, "");
    stripped.trim().to_string()
}

/// Canned persona comments by score band; the tier of last resort.
pub fn heuristic_comment(persona_name: &str, overall: u8) -> String {
    let band = match overall {
        0..=39 => 0,
        40..=59 => 1,
        60..=79 => 2,
        _ => 3,
    };
    let comments: [&str; 4] = match persona_name {
        "Le Cassant" => [
            "J'ai entendu des alarmes de voiture plus mélodieuses. On arrête les frais.",
            "Disons que la chanson a survécu, mais de justesse. Il y a du travail, beaucoup.",
            "Contre toute attente, ce n'était pas un naufrage. Presque agréable par moments.",
            "Bon. Je déteste l'admettre, mais c'était réellement impressionnant.",
        ],
        "L'Encourageant" => [
            "Il y a du courage à monter sur scène, et ça compte énormément. Continue de chanter !",
            "On sent une vraie envie et de belles intentions. Avec un peu de pratique, ça va décoller.",
            "Bravo, il y a de très jolis moments dans cette interprétation. Garde cette énergie !",
            "Magnifique ! Une interprétation sincère et maîtrisée, je suis conquis.",
        ],
        _ => [
            "L'intonation dévie trop souvent du fondamental et le placement rythmique reste instable.",
            "Le support respiratoire est irrégulier, ce qui fragilise la justesse dans les aigus.",
            "Bonne gestion du souffle et un vibrato qui se stabilise. Le phrasé mérite encore du travail.",
            "Justesse remarquable et placement précis. La technique vocale est solide.",
        ],
    };
    comments[band].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn scores(overall: u8) -> ScoreSummary {
        ScoreSummary {
            overall,
            pitch: 72.0,
            rhythm: 65.0,
            lyrics: 58.0,
        }
    }

    fn config(uri: &str) -> JudgeModelConfig {
        JudgeModelConfig {
            base_url: uri.to_string(),
            backoff_base: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[test]
    fn think_blocks_are_stripped() {
        assert_eq!(
            strip_think_blocks("<think>hmm, scores are low</think>Quel courage !"),
            "Quel courage !"
        );
        // Unclosed marker from token truncation
        assert_eq!(
            strip_think_blocks("Bravo pour la prestation. <think>now let me reason"),
            "Bravo pour la prestation."
        );
        assert_eq!(strip_think_blocks("Pas de balise ici."), "Pas de balise ici.");
    }

    #[test]
    fn heuristic_covers_every_band_and_persona() {
        for persona in ["Le Cassant", "L'Encourageant", "Le Technique"] {
            for overall in [0u8, 45, 70, 95] {
                assert!(!heuristic_comment(persona, overall).is_empty());
            }
        }
    }

    #[test]
    fn votes_follow_persona_thresholds() {
        let personas = default_personas();
        assert_eq!(personas[0].yes_threshold, 70); // Le Cassant
        assert_eq!(personas[1].yes_threshold, 40); // L'Encourageant
        assert_eq!(personas[2].yes_threshold, 55); // Le Technique
    }

    #[tokio::test]
    async fn primary_model_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_string_contains("qwen3:4b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "<think>ok</think>Une voix pleine de promesses, vraiment."
            })))
            .mount(&server)
            .await;

        let judge = LlmJudgeClient::new(Client::new(), config(&server.uri()));
        let personas = default_personas();
        let comment = judge.comment(&personas[1], &scores(65), "Ma chanson").await;

        assert_eq!(comment.model, "qwen3:4b");
        assert_eq!(comment.comment, "Une voix pleine de promesses, vraiment.");
        assert_eq!(comment.vote, Vote::Yes); // 65 >= 40
    }

    #[tokio::test]
    async fn falls_through_primary_to_secondary() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_string_contains("qwen3:4b"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2) // two attempts on the primary tier
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_string_contains("qwen2.5:1.5b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "Un rythme à retravailler, mais l'intention est là."
            })))
            .expect(1)
            .mount(&server)
            .await;

        let judge = LlmJudgeClient::new(Client::new(), config(&server.uri()));
        let personas = default_personas();
        let comment = judge.comment(&personas[2], &scores(50), "Ma chanson").await;

        assert_eq!(comment.model, "qwen2.5:1.5b");
        assert_eq!(comment.vote, Vote::No); // 50 < 55
    }

    #[tokio::test]
    async fn heuristic_tier_never_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let judge = LlmJudgeClient::new(Client::new(), config(&server.uri()));
        let personas = default_personas();
        let comment = judge.comment(&personas[0], &scores(85), "Ma chanson").await;

        assert_eq!(comment.model, "heuristic");
        assert!(!comment.comment.is_empty());
        assert_eq!(comment.vote, Vote::Yes); // 85 >= 70
    }
}
