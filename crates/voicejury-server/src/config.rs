//! Server configuration
//!
//! Loaded from a YAML or TOML file (selected by extension) with
//! environment overrides for the secrets, so credentials never have to
//! live in the file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: HttpSection,
    pub storage: StorageSection,
    pub inference: InferenceSection,
    pub cache: CacheSection,
    pub analysis: AnalysisSection,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: HttpSection::default(),
            storage: StorageSection::default(),
            inference: InferenceSection::default(),
            cache: CacheSection::default(),
            analysis: AnalysisSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub bind_addr: String,
    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            json_logs: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub base_url: String,
    pub api_key: String,
    pub bucket: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000".to_string(),
            api_key: String::new(),
            bucket: "voicejury".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSection {
    pub separation_url: String,
    pub pitch_url: String,
    pub stt_shared_url: String,
    pub stt_public_api_url: String,
    pub stt_public_api_key: String,
    pub lyrics_synced_url: String,
    pub lyrics_plain_url: String,
    pub lyrics_plain_token: String,
    pub extractor_url: String,
    /// Co-tenant LLM server sharing the heavy GPU.
    pub cotenant_url: String,
    pub cotenant_model: String,
    pub judge_primary_model: String,
    pub judge_secondary_model: String,
}

impl Default for InferenceSection {
    fn default() -> Self {
        Self {
            separation_url: "http://separation:9001".to_string(),
            pitch_url: "http://pitch:9002".to_string(),
            stt_shared_url: "http://shared-whisper:9000".to_string(),
            stt_public_api_url: "https://api.groq.com".to_string(),
            stt_public_api_key: String::new(),
            lyrics_synced_url: "https://lrclib.net".to_string(),
            lyrics_plain_url: "https://api.genius.com".to_string(),
            lyrics_plain_token: String::new(),
            extractor_url: "http://extractor:9003".to_string(),
            cotenant_url: "http://localhost:11435".to_string(),
            cotenant_model: "qwen3:4b".to_string(),
            judge_primary_model: "qwen3:4b".to_string(),
            judge_secondary_model: "qwen2.5:1.5b".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub db_path: PathBuf,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("~/.voicejury/cache.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSection {
    pub language: String,
    pub temp_dir: PathBuf,
    /// Session record TTL in seconds (3 hours).
    pub session_ttl_secs: u64,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            language: "fr".to_string(),
            temp_dir: PathBuf::from("/tmp/voicejury"),
            session_ttl_secs: 3 * 3600,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    FileRead(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

impl ServerConfig {
    /// Load from a file; `.toml` parses as TOML, anything else as YAML.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let expanded = shellexpand::tilde(path);
        let path = PathBuf::from(expanded.as_ref());
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            ConfigError::FileRead(format!("{}: {}", path.display(), e))
        })?;

        let mut config: ServerConfig =
            if path.extension().and_then(|s| s.to_str()) == Some("toml") {
                toml::from_str(&contents)
                    .map_err(|e| ConfigError::ParseError(format!("TOML: {}", e)))?
            } else {
                serde_yaml::from_str(&contents)
                    .map_err(|e| ConfigError::ParseError(format!("YAML: {}", e)))?
            };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Secrets and endpoints can always come from the environment.
    fn apply_env_overrides(&mut self) {
        let overrides: [(&str, &mut String); 6] = [
            ("STORAGE_URL", &mut self.storage.base_url),
            ("STORAGE_API_KEY", &mut self.storage.api_key),
            ("STORAGE_BUCKET", &mut self.storage.bucket),
            ("SHARED_STT_URL", &mut self.inference.stt_shared_url),
            ("STT_PUBLIC_API_KEY", &mut self.inference.stt_public_api_key),
            ("LYRICS_PLAIN_TOKEN", &mut self.inference.lyrics_plain_token),
        ];
        for (var, slot) in overrides {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    *slot = value;
                }
            }
        }
    }

    pub fn expanded_cache_db(&self) -> PathBuf {
        let raw = self.cache.db_path.to_string_lossy();
        PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
    }
}
