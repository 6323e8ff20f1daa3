//! Expiry sweep seam
//!
//! Stores that accumulate expired rows implement this so the cleanup
//! reaper can sweep them on its schedule without knowing their internals.

use async_trait::async_trait;

use crate::Result;

#[async_trait]
pub trait ExpirySweep: Send + Sync {
    /// Delete expired entries; returns how many were removed.
    async fn cleanup_expired(&self) -> Result<u64>;
}
