//! C8: Maintenance scheduler — three periodic jobs: temp sweep, expired
//! batches, and expired sessions. Run from the supervisor's tickers and
//! also reachable manually via `/maintenance/cleanup`.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::model::BatchStatus;
use crate::session::SessionStore;
use crate::store::Store;
use crate::tracker::BatchTracker;

#[derive(Debug, Clone, Copy)]
pub struct MaintenanceConfig {
    pub temp_age: Duration,
    pub batch_age: Duration,
    pub pending_age: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            temp_age: Duration::from_secs(30 * 60),
            batch_age: Duration::from_secs(24 * 60 * 60),
            pending_age: Duration::from_secs(72 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CleanupReport {
    pub batches_cleaned: u64,
    pub temp_files_cleaned: u64,
    pub pending_batches_cleaned: u64,
}

/// Deletes files under `<root>/temp_uploads/` older than `temp_age`.
pub fn sweep_temp_uploads(store: &Store, temp_age: Duration) -> u64 {
    let mut cleaned = 0;
    let dir = store.temp_uploads_dir();
    for path in store.list_entries(&dir).unwrap_or_default() {
        if is_older_than(&path, temp_age) {
            store.remove_file_lenient(&path);
            cleaned += 1;
        }
    }
    cleaned
}

fn is_older_than(path: &Path, age: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(|modified| modified.elapsed().map(|e| e > age).unwrap_or(false))
        .unwrap_or(false)
}

/// Expires batches: `{completed, failed}` older than `batch_age` are
/// deleted outright. Batches with a non-empty pending ledger are never
/// touched regardless of age, unless `pending_age` (the hard cap) has
/// elapsed, at which point stale pending artifacts are wiped and the batch
/// is marked `failed` before its documents are removed (P8).
pub async fn expire_batches(tracker: &BatchTracker, cfg: MaintenanceConfig) -> (u64, u64) {
    let mut batches_cleaned = 0;
    let mut pending_batches_cleaned = 0;

    let Ok(summaries) = tracker.list_all() else { return (0, 0) };
    let now = Utc::now();

    for summary in summaries {
        let age = now.signed_duration_since(summary.updated_at).to_std().unwrap_or_default();

        if summary.status.is_terminal() {
            if age > cfg.batch_age {
                let Ok(batch) = tracker.load(&summary.id).await else { continue };
                if !batch.pending.is_empty() {
                    // A terminal batch should never carry pending work, but
                    // guard against it defensively rather than delete data
                    // recovery might still need.
                    warn!(batch_id = %summary.id, "terminal batch unexpectedly has pending work, skipping expiry");
                    continue;
                }
                let _ = tracker.delete(&summary.id).await;
                batches_cleaned += 1;
            }
            continue;
        }

        // Non-terminal: only the pending-age hard cap can force removal.
        if age > cfg.pending_age {
            info!(batch_id = %summary.id, "pending-age hard cap exceeded, forcing batch failure and cleanup");
            let _ = tracker.mark_failed(&summary.id).await;
            let _ = tracker.delete(&summary.id).await;
            pending_batches_cleaned += 1;
        }
    }

    (batches_cleaned, pending_batches_cleaned)
}

/// Drops sessions past `expires_at`.
pub fn expire_sessions(sessions: &SessionStore) -> u64 {
    sessions.prune_expired() as u64
}

pub async fn run_cleanup(
    store: &Store,
    tracker: &BatchTracker,
    sessions: &SessionStore,
    cfg: MaintenanceConfig,
) -> CleanupReport {
    let temp_files_cleaned = sweep_temp_uploads(store, cfg.temp_age);
    let (batches_cleaned, pending_batches_cleaned) = expire_batches(tracker, cfg).await;
    let _ = expire_sessions(sessions);

    CleanupReport { batches_cleaned, temp_files_cleaned, pending_batches_cleaned }
}
