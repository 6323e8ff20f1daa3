//! Inference clients for VoiceJury
//!
//! Thin HTTP wrappers over the external GPU/LLM services, each expressed
//! as a list of fallback tiers behind the trait seams in
//! `voicejury-core::clients`, plus the advisory GPU co-tenant coordinator.

pub mod extractor;
pub mod gpu;
pub mod http;
pub mod judge;
pub mod lyrics;
pub mod pitch;
pub mod separation;
pub mod stt;

pub use extractor::HttpMediaExtractor;
pub use gpu::GpuCoordinator;
pub use http::{HttpClientConfig, create_client, with_retry};
pub use judge::{JudgeModelConfig, LlmJudgeClient, default_personas, strip_think_blocks};
pub use lyrics::{PlainProviderConfig, SyncedProviderConfig, TieredLyricsClient};
pub use pitch::HttpPitchClient;
pub use separation::HttpSeparationClient;
pub use stt::{SttTier, TieredSttClient};
