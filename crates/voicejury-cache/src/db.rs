//! Cold cache tier — SQLite pool and schema

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;

use voicejury_core::{Error, Result};

/// Open (or create) the artifact cache database and bootstrap its schema.
pub async fn open_cache_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal),
        )
        .await
        .map_err(|e| Error::Cache(format!("failed to open cache db: {}", e)))?;

    initialize_schema(&pool).await?;
    Ok(pool)
}

/// In-memory pool for tests.
pub async fn open_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(SqliteConnectOptions::new().in_memory(true))
        .await
        .map_err(|e| Error::Cache(format!("failed to open in-memory cache db: {}", e)))?;
    initialize_schema(&pool).await?;
    Ok(pool)
}

async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_err)?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (1)")
        .execute(pool)
        .await
        .map_err(db_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lyrics_cache (
            track_id TEXT PRIMARY KEY,
            lyrics_text TEXT NOT NULL DEFAULT '',
            synced_lines TEXT,
            sync_type TEXT NOT NULL,
            source TEXT NOT NULL,
            source_url TEXT,
            artist_name TEXT,
            track_name TEXT,
            fetched_at TEXT NOT NULL,
            expires_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS word_timestamps_cache (
            track_id TEXT NOT NULL,
            video_id TEXT NOT NULL DEFAULT '',
            text TEXT NOT NULL DEFAULT '',
            words TEXT NOT NULL,
            provenance TEXT NOT NULL,
            model_version TEXT,
            quality REAL,
            created_at TEXT NOT NULL,
            expires_at TEXT,
            UNIQUE (track_id, video_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_err)?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_word_ts_track ON word_timestamps_cache(track_id)",
    )
    .execute(pool)
    .await
    .map_err(db_err)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lyrics_offsets (
            track_id TEXT NOT NULL,
            video_id TEXT NOT NULL,
            offset_seconds REAL NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (track_id, video_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_err)?;

    Ok(())
}

pub(crate) fn db_err(e: sqlx::Error) -> Error {
    Error::Cache(e.to_string())
}
