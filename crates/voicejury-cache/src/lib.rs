//! Two-tier artifact cache for VoiceJury
//!
//! Hot tier: in-process TTL map (one hour). Cold tier: SQLite tables with
//! upsert semantics and per-provenance expiry. Stems and reference pitch
//! artifacts live on the blob store under their fingerprint and are not
//! managed here.

pub mod db;
pub mod hot;
pub mod lyrics;
pub mod offsets;
pub mod word_timestamps;

pub use db::{open_cache_pool, open_memory_pool};
pub use hot::HotTier;
pub use lyrics::{CachedLyrics, LyricsCache};
pub use offsets::LyricsOffsetStore;
pub use word_timestamps::{CachedWordTimestamps, WordProvenance, WordTimestampsCache};
