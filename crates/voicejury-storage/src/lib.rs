//! Blob store client for VoiceJury
//!
//! Exactly one live [`BlobStore`] per API or worker process; all pipeline
//! uploads, downloads, existence probes and deletes share its bounded pool.

mod client;

pub use client::{BlobStore, BlobStoreConfig};
