//! Hot cache tier
//!
//! In-process TTL map holding the last view of an entry per fingerprint.
//! Absent or expired entries fall through to the cold tier.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Tier-1 TTL: one hour.
pub const HOT_TTL: Duration = Duration::from_secs(3600);

pub struct HotTier<T: Clone> {
    map: DashMap<String, (T, Instant)>,
    ttl: Duration,
}

impl<T: Clone> HotTier<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            map: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        // The guard must be gone before remove() touches the same shard.
        let expired = match self.map.get(key) {
            Some(entry) if entry.1 > Instant::now() => return Some(entry.0.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.map.remove(key);
        }
        None
    }

    pub fn set(&self, key: &str, value: T) {
        self.map
            .insert(key.to_string(), (value, Instant::now() + self.ttl));
    }

    pub fn invalidate(&self, key: &str) {
        self.map.remove(key);
    }

    /// Drop every entry. Used by the expiry sweep — cheaper than tracking
    /// per-entry deadlines during a scan, and the cold tier refills misses.
    pub fn clear(&self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<T: Clone> Default for HotTier<T> {
    fn default() -> Self {
        Self::new(HOT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_invalidate() {
        let tier: HotTier<String> = HotTier::new(Duration::from_secs(60));
        assert!(tier.get("a").is_none());
        tier.set("a", "1".to_string());
        assert_eq!(tier.get("a").as_deref(), Some("1"));
        tier.invalidate("a");
        assert!(tier.get("a").is_none());
    }

    #[test]
    fn expired_entries_fall_through() {
        let tier: HotTier<u32> = HotTier::new(Duration::ZERO);
        tier.set("a", 1);
        assert!(tier.get("a").is_none());
        assert!(tier.is_empty());
    }

    #[test]
    fn newer_entry_supersedes() {
        let tier: HotTier<u32> = HotTier::new(Duration::from_secs(60));
        tier.set("a", 1);
        tier.set("a", 2);
        assert_eq!(tier.get("a"), Some(2));
        assert_eq!(tier.len(), 1);
    }
}
