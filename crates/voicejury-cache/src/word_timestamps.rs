//! Word-level timestamps cache
//!
//! Keyed by (track id, reference-video id). Several rows can coexist for
//! one track — different videos, different provenances — and the reader
//! picks the best one: an exact video match wins, then provenance rank
//! (user-corrected > professional > generated).
//!
//! TTL: professional word-sync 365 days, generated 90 days, user-corrected
//! never expires.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use voicejury_core::sweep::ExpirySweep;
use voicejury_core::{Result, Word};

use crate::db::db_err;
use crate::hot::HotTier;

const TTL_PROFESSIONAL_DAYS: i64 = 365;
const TTL_GENERATED_DAYS: i64 = 90;

/// Where a set of word timestamps came from; drives TTL and read priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordProvenance {
    /// Hand-fixed by a user; permanent.
    UserCorrected,
    /// Professional word-synced source.
    Professional,
    /// Machine-generated (STT).
    Generated,
}

impl WordProvenance {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "user_corrected" => WordProvenance::UserCorrected,
            "musixmatch_word" => WordProvenance::Professional,
            _ => WordProvenance::Generated,
        }
    }

    /// Higher wins when several rows match.
    fn rank(self) -> u8 {
        match self {
            WordProvenance::UserCorrected => 3,
            WordProvenance::Professional => 2,
            WordProvenance::Generated => 1,
        }
    }

    fn ttl_days(self) -> Option<i64> {
        match self {
            WordProvenance::UserCorrected => None,
            WordProvenance::Professional => Some(TTL_PROFESSIONAL_DAYS),
            WordProvenance::Generated => Some(TTL_GENERATED_DAYS),
        }
    }
}

/// A cached row.
#[derive(Debug, Clone)]
pub struct CachedWordTimestamps {
    pub track_id: String,
    pub video_id: Option<String>,
    pub text: String,
    pub words: Vec<Word>,
    /// Raw provenance tag as emitted by the producing engine
    /// (e.g. `musixmatch_word`, `whisper_timestamped`, `groq_whisper`).
    pub provenance: String,
    pub model_version: Option<String>,
    /// Mean word confidence or another provider-defined quality metric.
    pub quality: Option<f64>,
    pub created_at: DateTime<Utc>,
}

pub struct WordTimestampsCache {
    hot: HotTier<CachedWordTimestamps>,
    pool: SqlitePool,
}

impl WordTimestampsCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            hot: HotTier::default(),
            pool,
        }
    }

    fn hot_key(track_id: &str, video_id: Option<&str>) -> String {
        format!("word_ts:{}:{}", track_id, video_id.unwrap_or("any"))
    }

    /// Best live row for the track: exact video match first, then
    /// provenance rank, then recency.
    pub async fn get(
        &self,
        track_id: &str,
        video_id: Option<&str>,
    ) -> Result<Option<CachedWordTimestamps>> {
        let key = Self::hot_key(track_id, video_id);
        if let Some(hit) = self.hot.get(&key) {
            debug!(track_id, "word timestamps hot hit");
            return Ok(Some(hit));
        }

        let rows = sqlx::query(
            r#"
            SELECT track_id, video_id, text, words, provenance, model_version,
                   quality, created_at
            FROM word_timestamps_cache
            WHERE track_id = ?1
              AND (expires_at IS NULL OR expires_at > ?2)
            "#,
        )
        .bind(track_id)
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let stored_video: String = row.try_get("video_id").map_err(db_err)?;
            let words: Vec<Word> =
                serde_json::from_str(&row.try_get::<String, _>("words").map_err(db_err)?)?;
            candidates.push(CachedWordTimestamps {
                track_id: row.try_get("track_id").map_err(db_err)?,
                video_id: (!stored_video.is_empty()).then_some(stored_video),
                text: row.try_get("text").map_err(db_err)?,
                words,
                provenance: row.try_get("provenance").map_err(db_err)?,
                model_version: row.try_get("model_version").map_err(db_err)?,
                quality: row.try_get("quality").map_err(db_err)?,
                created_at: row.try_get("created_at").map_err(db_err)?,
            });
        }

        candidates.sort_by_key(|c| {
            let exact = video_id.is_some() && c.video_id.as_deref() == video_id;
            let rank = WordProvenance::parse(&c.provenance).rank();
            // Sort descending: exact match, then provenance, then recency.
            std::cmp::Reverse((exact, rank, c.created_at))
        });

        let best = candidates.into_iter().next();
        if let Some(best) = &best {
            debug!(track_id, provenance = %best.provenance, "word timestamps cold hit");
            self.hot.set(&key, best.clone());
        }
        Ok(best)
    }

    /// Upsert one (track, video) row; newer data supersedes the old row.
    pub async fn set(&self, entry: &CachedWordTimestamps) -> Result<()> {
        let provenance = WordProvenance::parse(&entry.provenance);
        let expires_at = provenance
            .ttl_days()
            .map(|days| Utc::now() + ChronoDuration::days(days));
        let words_json = serde_json::to_string(&entry.words)?;

        sqlx::query(
            r#"
            INSERT INTO word_timestamps_cache
                (track_id, video_id, text, words, provenance, model_version,
                 quality, created_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (track_id, video_id) DO UPDATE SET
                text = excluded.text,
                words = excluded.words,
                provenance = excluded.provenance,
                model_version = excluded.model_version,
                quality = excluded.quality,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&entry.track_id)
        .bind(entry.video_id.as_deref().unwrap_or(""))
        .bind(&entry.text)
        .bind(words_json)
        .bind(&entry.provenance)
        .bind(&entry.model_version)
        .bind(entry.quality)
        .bind(Utc::now())
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.hot
            .set(&Self::hot_key(&entry.track_id, entry.video_id.as_deref()), entry.clone());

        info!(
            track_id = %entry.track_id,
            provenance = %entry.provenance,
            words = entry.words.len(),
            "word timestamps cached"
        );
        Ok(())
    }

    pub async fn invalidate(&self, track_id: &str, video_id: Option<&str>) -> Result<()> {
        self.hot.invalidate(&Self::hot_key(track_id, video_id));
        sqlx::query("DELETE FROM word_timestamps_cache WHERE track_id = ?1 AND video_id = ?2")
            .bind(track_id)
            .bind(video_id.unwrap_or(""))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl ExpirySweep for WordTimestampsCache {
    async fn cleanup_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM word_timestamps_cache WHERE expires_at IS NOT NULL AND expires_at < ?1",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        self.hot.clear();
        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted, "expired word timestamp rows removed");
        }
        Ok(deleted)
    }
}
