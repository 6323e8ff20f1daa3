//! Cleanup reaper
//!
//! Hourly background sweep: session-scoped blobs for sessions past the age
//! cutoff, stale local staging directories, and expired cold-cache rows.
//! The per-fingerprint reference cache (`cache/{ref_id}/…`) is never
//! touched — those artifacts are shared across sessions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

use voicejury_core::sweep::ExpirySweep;
use voicejury_core::{SessionStore, paths};
use voicejury_storage::BlobStore;

/// Reaper schedule and cutoffs.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Sweep period.
    pub interval: Duration,
    /// Sessions older than this get their blob paths deleted.
    pub session_max_age: Duration,
    /// Root of local GPU staging directories.
    pub temp_dir: PathBuf,
    /// Staging directories untouched for this long are removed.
    pub temp_max_age: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            session_max_age: Duration::from_secs(7200),
            temp_dir: PathBuf::from("/tmp/voicejury"),
            temp_max_age: Duration::from_secs(7200),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ReapStats {
    pub sessions_swept: u64,
    pub blobs_deleted: u64,
    pub temp_dirs_removed: u64,
    pub cache_rows_deleted: u64,
}

/// One full cleanup pass.
pub async fn run_cleanup(
    store: &dyn SessionStore,
    blobs: &BlobStore,
    sweepers: &[Arc<dyn ExpirySweep>],
    config: &ReaperConfig,
) -> ReapStats {
    let mut stats = ReapStats::default();

    // Session-scoped blobs for old sessions. The record itself is left to
    // its own TTL.
    match store.list_ids().await {
        Ok(ids) => {
            for id in ids {
                let Ok(Some(record)) = store.read(&id).await else {
                    continue;
                };
                let age = chrono::Utc::now() - record.created_at;
                if age.to_std().unwrap_or_default() < config.session_max_age {
                    continue;
                }
                stats.sessions_swept += 1;
                for path in paths::session_blob_paths(&id) {
                    blobs.delete(&path).await;
                    stats.blobs_deleted += 1;
                }
            }
        }
        Err(e) => warn!(error = %e, "reaper could not list sessions"),
    }

    stats.temp_dirs_removed = remove_stale_temp_dirs(&config.temp_dir, config.temp_max_age);

    for sweeper in sweepers {
        match sweeper.cleanup_expired().await {
            Ok(n) => stats.cache_rows_deleted += n,
            Err(e) => warn!(error = %e, "cache expiry sweep failed"),
        }
    }

    info!(
        sessions = stats.sessions_swept,
        blobs = stats.blobs_deleted,
        temp_dirs = stats.temp_dirs_removed,
        cache_rows = stats.cache_rows_deleted,
        "cleanup pass complete"
    );
    stats
}

/// Remove staging directories whose mtime is older than the cutoff.
fn remove_stale_temp_dirs(root: &std::path::Path, max_age: Duration) -> u64 {
    let Ok(entries) = std::fs::read_dir(root) else {
        return 0;
    };
    let cutoff = SystemTime::now() - max_age;
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(|mtime| mtime < cutoff)
            .unwrap_or(false);
        if stale {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(dir = %path.display(), error = %e, "failed to remove stale temp dir");
            } else {
                info!(dir = %path.display(), "removed stale temp dir");
                removed += 1;
            }
        }
    }
    removed
}

/// Spawn the periodic reaper. The first tick fires after one full
/// interval.
pub fn spawn_reaper(
    store: Arc<dyn SessionStore>,
    blobs: Arc<BlobStore>,
    sweepers: Vec<Arc<dyn ExpirySweep>>,
    config: ReaperConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // immediate first tick consumed
        loop {
            ticker.tick().await;
            run_cleanup(store.as_ref(), blobs.as_ref(), &sweepers, &config).await;
        }
    })
}
