//! C7: Recovery — the startup scan that resumes any batch whose pending
//! ledger is non-empty. Safe to run twice: commit-then-remove in the
//! tracker is atomic from the consumer's point of view, so re-enqueuing an
//! already-drained ledger is simply a no-op dispatch pass.

use std::sync::Arc;

use tracing::{info, warn};

use crate::ingest::IngestPipeline;
use crate::model::BatchStatus;
use crate::tracker::BatchTracker;

pub async fn run(tracker: &Arc<BatchTracker>, ingest: &Arc<IngestPipeline>) {
    let summaries = match tracker.list_all() {
        Ok(s) => s,
        Err(err) => {
            warn!(%err, "recovery scan failed to enumerate batch documents");
            return;
        }
    };

    for summary in summaries {
        let Ok(batch) = tracker.load(&summary.id).await else { continue };

        reconcile_pending_files(tracker, &batch.id).await;

        if matches!(batch.status, BatchStatus::Initialized | BatchStatus::Processing) {
            if !batch.pending.is_empty() {
                info!(batch_id = %batch.id, pending = batch.pending.len(), "recovery resuming batch");
                ingest.dispatch(batch.id.clone());
            } else if batch.status == BatchStatus::Processing {
                // Both ledgers empty but never marked complete: the
                // process likely crashed between the last commit and the
                // completion check. `append_result`'s completion check
                // only runs as a side effect of a commit, so replay it
                // here directly via `complete`.
                let _ = tracker.complete(&batch.id).await;
            }
        }
    }
}

/// Reconciles a pending-files manifest against the blobs actually present
/// on disk: an orphaned blob with no manifest entry is deleted, and an
/// orphaned manifest entry with no blob is dropped after recording an
/// `error` Result for that item (it is simply gone).
async fn reconcile_pending_files(tracker: &Arc<BatchTracker>, batch_id: &str) {
    let store = tracker.store();
    let dir = store.pending_files_dir(batch_id);
    let Ok(batch) = tracker.load(batch_id).await else { return };

    let on_disk: std::collections::HashSet<String> = store
        .list_entries(&dir)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    let manifested: std::collections::HashSet<String> =
        batch.pending.files.iter().map(|f| f.local_name.clone()).collect();

    for orphan_blob in on_disk.difference(&manifested) {
        store.remove_file_lenient(&dir.join(orphan_blob));
    }

    for missing in manifested.difference(&on_disk).cloned().collect::<Vec<_>>() {
        if let Some(file) = batch.pending.files.iter().find(|f| f.local_name == missing).cloned() {
            let result = crate::model::BatchResult::errored(
                file.original_name.clone(),
                "pending blob missing on disk during recovery".to_string(),
            );
            let _ = tracker
                .append_result(batch_id, result, crate::tracker::PendingKey::File(missing))
                .await;
        }
    }
}
