//! Lyrics display offsets
//!
//! User-set offset in seconds between displayed lyrics and the reference
//! video, keyed by (track id, reference-video id). Stored permanently —
//! a user who fixed the timing once should never have to do it again.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use voicejury_core::Result;

use crate::db::db_err;

pub struct LyricsOffsetStore {
    pool: SqlitePool,
}

impl LyricsOffsetStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Saved offset, or 0.0 when none exists.
    pub async fn get(&self, track_id: &str, video_id: &str) -> Result<f64> {
        let offset: Option<f64> = sqlx::query_scalar(
            "SELECT offset_seconds FROM lyrics_offsets WHERE track_id = ?1 AND video_id = ?2",
        )
        .bind(track_id)
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(offset.unwrap_or(0.0))
    }

    pub async fn set(&self, track_id: &str, video_id: &str, offset_seconds: f64) -> Result<f64> {
        sqlx::query(
            r#"
            INSERT INTO lyrics_offsets (track_id, video_id, offset_seconds, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (track_id, video_id) DO UPDATE SET
                offset_seconds = excluded.offset_seconds,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(track_id)
        .bind(video_id)
        .bind(offset_seconds)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        info!(track_id, video_id, offset_seconds, "lyrics offset saved");
        Ok(offset_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_pool;

    #[tokio::test]
    async fn missing_offset_is_zero() {
        let store = LyricsOffsetStore::new(open_memory_pool().await.unwrap());
        assert_eq!(store.get("t1", "v1").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn set_and_overwrite() {
        let store = LyricsOffsetStore::new(open_memory_pool().await.unwrap());
        store.set("t1", "v1", 1.25).await.unwrap();
        assert_eq!(store.get("t1", "v1").await.unwrap(), 1.25);

        store.set("t1", "v1", -0.5).await.unwrap();
        assert_eq!(store.get("t1", "v1").await.unwrap(), -0.5);

        // Different video id is a different key
        assert_eq!(store.get("t1", "v2").await.unwrap(), 0.0);
    }
}
