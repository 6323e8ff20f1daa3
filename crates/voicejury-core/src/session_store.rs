//! Session store trait
//!
//! Abstraction over a keyed record store with per-key TTL. The reference
//! implementation is the in-process store in `voicejury-session`; the trait
//! leaves room for a scripted KV-store backend with the same contract.

use async_trait::async_trait;
use std::time::Duration;

use crate::types::{SessionPatch, SessionRecord};
use crate::Result;

/// Default TTL applied when a record has somehow lost its expiry.
pub const FALLBACK_TTL: Duration = Duration::from_secs(3600);

/// Keyed session record store with atomic merge.
///
/// # Atomicity
///
/// `merge` MUST read the current record, apply the patch field-wise,
/// preserve the remaining TTL (falling back to [`FALLBACK_TTL`] when none
/// is set) and write back as one indivisible step. Implementations without
/// native scripting must use optimistic concurrency or per-entry locking —
/// dropping a concurrent update is not permitted.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a new record with the given TTL.
    async fn create(&self, record: SessionRecord, ttl: Duration) -> Result<()>;

    /// Read a record. Expired or absent records return `None`.
    async fn read(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// Atomically overlay `patch` onto the current record.
    ///
    /// Returns `false` when the record does not exist (or has expired).
    /// The remaining TTL never increases as a result of a merge.
    async fn merge(&self, session_id: &str, patch: SessionPatch) -> Result<bool>;

    /// Delete a record. Deleting a missing record is not an error.
    async fn delete(&self, session_id: &str) -> Result<()>;

    /// Write a dedicated key (e.g. a ready-timestamp) with its own TTL,
    /// outside any record merge path.
    async fn set_key(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Read a dedicated key. Expired or absent keys return `None`.
    async fn get_key(&self, key: &str) -> Result<Option<String>>;

    /// Ids of all live session records; used by the cleanup reaper.
    async fn list_ids(&self) -> Result<Vec<String>>;
}
