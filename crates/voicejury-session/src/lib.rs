//! Session state for VoiceJury
//!
//! The in-process [`MemorySessionStore`] implements the atomic-merge
//! contract from `voicejury-core`; the [`reaper`] module evicts expired
//! session blobs and stale staging directories on a fixed schedule.

pub mod memory;
pub mod reaper;

pub use memory::{MemorySessionStore, require_session};
pub use reaper::{ReapStats, ReaperConfig, run_cleanup, spawn_reaper};
