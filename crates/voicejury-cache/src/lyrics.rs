//! Lyrics cache
//!
//! Hot DashMap tier over a persistent SQLite table. TTL depends on how the
//! lyrics were obtained:
//!
//! | Provenance          | TTL      |
//! |---------------------|----------|
//! | Synced provider     | 365 days |
//! | Plain-text provider | 90 days  |
//! | Negative lookup     | 7 days   |
//!
//! A cached negative result suppresses retry storms against the upstream
//! providers for a week.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use voicejury_core::sweep::ExpirySweep;
use voicejury_core::{LyricsLine, LyricsRecord, Result, SyncQuality};

use crate::db::db_err;
use crate::hot::HotTier;

const TTL_SYNCED_DAYS: i64 = 365;
const TTL_UNSYNCED_DAYS: i64 = 90;
const TTL_NOT_FOUND_DAYS: i64 = 7;

/// Cached lyrics view handed back to callers.
#[derive(Debug, Clone)]
pub struct CachedLyrics {
    pub record: LyricsRecord,
    pub cached_at: DateTime<Utc>,
}

pub struct LyricsCache {
    hot: HotTier<CachedLyrics>,
    pool: SqlitePool,
}

impl LyricsCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            hot: HotTier::default(),
            pool,
        }
    }

    fn hot_key(track_id: &str) -> String {
        format!("lyrics:{}", track_id)
    }

    fn ttl_days(record: &LyricsRecord) -> i64 {
        if !record.has_lyrics() {
            return TTL_NOT_FOUND_DAYS;
        }
        match record.sync_quality {
            SyncQuality::Synced => TTL_SYNCED_DAYS,
            _ => TTL_UNSYNCED_DAYS,
        }
    }

    /// Probe hot then cold; backfill hot on a cold hit. Expired cold rows
    /// read as absent.
    pub async fn get(&self, track_id: &str) -> Result<Option<CachedLyrics>> {
        let key = Self::hot_key(track_id);
        if let Some(hit) = self.hot.get(&key) {
            debug!(track_id, "lyrics cache hot hit");
            return Ok(Some(hit));
        }

        let row = sqlx::query(
            r#"
            SELECT lyrics_text, synced_lines, sync_type, source, source_url, fetched_at
            FROM lyrics_cache
            WHERE track_id = ?1
              AND (expires_at IS NULL OR expires_at > ?2)
            "#,
        )
        .bind(track_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lines: Option<Vec<LyricsLine>> = row
            .try_get::<Option<String>, _>("synced_lines")
            .map_err(db_err)?
            .and_then(|json| serde_json::from_str(&json).ok());
        let sync_quality = parse_sync_quality(row.try_get::<String, _>("sync_type").map_err(db_err)?);

        let cached = CachedLyrics {
            record: LyricsRecord {
                text: row.try_get("lyrics_text").map_err(db_err)?,
                lines,
                sync_quality,
                provenance: row.try_get("source").map_err(db_err)?,
                source_url: row.try_get("source_url").map_err(db_err)?,
            },
            cached_at: row.try_get("fetched_at").map_err(db_err)?,
        };

        debug!(track_id, "lyrics cache cold hit");
        self.hot.set(&key, cached.clone());
        Ok(Some(cached))
    }

    /// Upsert both tiers. A newer entry supersedes the old one under the
    /// same fingerprint.
    pub async fn set(
        &self,
        track_id: &str,
        record: &LyricsRecord,
        artist_name: Option<&str>,
        track_name: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        let ttl_days = Self::ttl_days(record);
        let expires_at = now + ChronoDuration::days(ttl_days);
        let lines_json = record
            .lines
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO lyrics_cache
                (track_id, lyrics_text, synced_lines, sync_type, source, source_url,
                 artist_name, track_name, fetched_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (track_id) DO UPDATE SET
                lyrics_text = excluded.lyrics_text,
                synced_lines = excluded.synced_lines,
                sync_type = excluded.sync_type,
                source = excluded.source,
                source_url = excluded.source_url,
                artist_name = excluded.artist_name,
                track_name = excluded.track_name,
                fetched_at = excluded.fetched_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(track_id)
        .bind(&record.text)
        .bind(lines_json)
        .bind(sync_quality_str(record.sync_quality))
        .bind(&record.provenance)
        .bind(&record.source_url)
        .bind(artist_name)
        .bind(track_name)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.hot.set(
            &Self::hot_key(track_id),
            CachedLyrics {
                record: record.clone(),
                cached_at: now,
            },
        );

        info!(
            track_id,
            source = %record.provenance,
            ttl_days,
            "lyrics cached"
        );
        Ok(())
    }

    pub async fn invalidate(&self, track_id: &str) -> Result<()> {
        self.hot.invalidate(&Self::hot_key(track_id));
        sqlx::query("DELETE FROM lyrics_cache WHERE track_id = ?1")
            .bind(track_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl ExpirySweep for LyricsCache {
    async fn cleanup_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM lyrics_cache WHERE expires_at IS NOT NULL AND expires_at < ?1",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        self.hot.clear();
        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted, "expired lyrics cache rows removed");
        }
        Ok(deleted)
    }
}

pub(crate) fn parse_sync_quality(s: String) -> SyncQuality {
    match s.as_str() {
        "synced" => SyncQuality::Synced,
        "unsynced" => SyncQuality::Unsynced,
        _ => SyncQuality::None,
    }
}

pub(crate) fn sync_quality_str(q: SyncQuality) -> &'static str {
    match q {
        SyncQuality::Synced => "synced",
        SyncQuality::Unsynced => "unsynced",
        SyncQuality::None => "none",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_pool;

    fn synced_record() -> LyricsRecord {
        LyricsRecord {
            text: "la la la".to_string(),
            lines: Some(vec![LyricsLine {
                text: "la la la".to_string(),
                start_ms: 1200,
                end_ms: Some(3400),
            }]),
            sync_quality: SyncQuality::Synced,
            provenance: "lrclib".to_string(),
            source_url: Some("https://lrclib.example/x".to_string()),
        }
    }

    #[tokio::test]
    async fn set_then_get_round_trips_through_cold_tier() {
        let cache = LyricsCache::new(open_memory_pool().await.unwrap());
        cache
            .set("track-1", &synced_record(), Some("Artist"), Some("Song"))
            .await
            .unwrap();

        // Clear the hot tier to force a cold read
        cache.hot.clear();
        let hit = cache.get("track-1").await.unwrap().unwrap();
        assert_eq!(hit.record.text, "la la la");
        assert_eq!(hit.record.sync_quality, SyncQuality::Synced);
        assert_eq!(hit.record.lines.as_ref().unwrap().len(), 1);

        // Cold hit backfilled hot
        assert_eq!(cache.hot.len(), 1);
    }

    #[tokio::test]
    async fn negative_lookup_is_cached() {
        let cache = LyricsCache::new(open_memory_pool().await.unwrap());
        cache
            .set("unknown-track", &LyricsRecord::not_found(), None, None)
            .await
            .unwrap();

        let hit = cache.get("unknown-track").await.unwrap().unwrap();
        assert!(!hit.record.has_lyrics());
        assert_eq!(hit.record.provenance, "none");
    }

    #[tokio::test]
    async fn newer_entry_supersedes_older() {
        let cache = LyricsCache::new(open_memory_pool().await.unwrap());
        cache
            .set("track-1", &LyricsRecord::not_found(), None, None)
            .await
            .unwrap();
        cache
            .set("track-1", &synced_record(), None, None)
            .await
            .unwrap();

        cache.hot.clear();
        let hit = cache.get("track-1").await.unwrap().unwrap();
        assert_eq!(hit.record.provenance, "lrclib");
    }

    #[tokio::test]
    async fn expired_rows_read_as_absent_and_sweep_deletes_them() {
        let cache = LyricsCache::new(open_memory_pool().await.unwrap());
        cache
            .set("track-1", &synced_record(), None, None)
            .await
            .unwrap();

        // Force the row into the past
        sqlx::query("UPDATE lyrics_cache SET expires_at = ?1")
            .bind(Utc::now() - ChronoDuration::days(1))
            .execute(&cache.pool)
            .await
            .unwrap();
        cache.hot.clear();

        assert!(cache.get("track-1").await.unwrap().is_none());
        assert_eq!(cache.cleanup_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn invalidate_removes_both_tiers() {
        let cache = LyricsCache::new(open_memory_pool().await.unwrap());
        cache
            .set("track-1", &synced_record(), None, None)
            .await
            .unwrap();
        cache.invalidate("track-1").await.unwrap();
        assert!(cache.get("track-1").await.unwrap().is_none());
    }

    #[test]
    fn ttl_policy_by_provenance() {
        assert_eq!(LyricsCache::ttl_days(&synced_record()), 365);
        let mut unsynced = synced_record();
        unsynced.sync_quality = SyncQuality::Unsynced;
        assert_eq!(LyricsCache::ttl_days(&unsynced), 90);
        assert_eq!(LyricsCache::ttl_days(&LyricsRecord::not_found()), 7);
    }
}
