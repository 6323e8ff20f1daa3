//! In-process session store
//!
//! DashMap-backed implementation of the [`SessionStore`] contract. The
//! atomic-merge requirement is satisfied structurally: the shard lock held
//! by the entry guard spans the whole read–overlay–write of `merge`, so a
//! concurrent update can never be dropped.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use voicejury_core::session_store::{FALLBACK_TTL, SessionStore};
use voicejury_core::{Error, Result, SessionPatch, SessionRecord};

struct Entry {
    record: SessionRecord,
    /// None means "no TTL recorded"; merge assigns the fallback.
    deadline: Option<Instant>,
}

struct KeyEntry {
    value: String,
    deadline: Instant,
}

/// In-memory TTL record store.
#[derive(Default)]
pub struct MemorySessionStore {
    records: DashMap<String, Entry>,
    keys: DashMap<String, KeyEntry>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired record and dedicated key. Reads already treat
    /// expired entries as absent; this reclaims the memory.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len() + self.keys.len();
        self.records
            .retain(|_, e| e.deadline.is_none_or(|d| d > now));
        self.keys.retain(|_, e| e.deadline > now);
        let removed = before - (self.records.len() + self.keys.len());
        if removed > 0 {
            debug!(removed, "purged expired session entries");
        }
        removed
    }

    fn is_live(entry: &Entry) -> bool {
        entry.deadline.is_none_or(|d| d > Instant::now())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, record: SessionRecord, ttl: Duration) -> Result<()> {
        let id = record.session_id.clone();
        self.records.insert(
            id,
            Entry {
                record,
                deadline: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn read(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        // The guard must be gone before remove() touches the same shard.
        let expired = match self.records.get(session_id) {
            Some(entry) if Self::is_live(&entry) => return Ok(Some(entry.record.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.records.remove(session_id);
        }
        Ok(None)
    }

    async fn merge(&self, session_id: &str, patch: SessionPatch) -> Result<bool> {
        // The guard from get_mut holds the shard lock for the whole
        // read-overlay-write, which is the indivisibility the contract asks
        // for.
        let Some(mut entry) = self.records.get_mut(session_id) else {
            return Ok(false);
        };
        if !Self::is_live(&entry) {
            drop(entry);
            self.records.remove(session_id);
            return Ok(false);
        }
        patch.apply(&mut entry.record);
        // Remaining TTL is preserved as-is; a record that lost its TTL gets
        // the fallback. Either way the deadline never moves later.
        if entry.deadline.is_none() {
            entry.deadline = Some(Instant::now() + FALLBACK_TTL);
        }
        Ok(true)
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.records.remove(session_id);
        Ok(())
    }

    async fn set_key(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.keys.insert(
            key.to_string(),
            KeyEntry {
                value,
                deadline: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get_key(&self, key: &str) -> Result<Option<String>> {
        let expired = match self.keys.get(key) {
            Some(entry) if entry.deadline > Instant::now() => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.keys.remove(key);
        }
        Ok(None)
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .records
            .iter()
            .filter(|e| e.deadline.is_none_or(|d| d > now))
            .map(|e| e.key().clone())
            .collect())
    }
}

/// Convenience used by handlers that must fail on a missing session.
pub async fn require_session(
    store: &dyn SessionStore,
    session_id: &str,
) -> Result<SessionRecord> {
    store
        .read(session_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))
}
