//! C6: Ingest pipeline — accepts a submission, materializes pending work
//! (files to disk, URL list to JSON), spawns a bounded worker pool, and
//! feeds results into the batch tracker (C4) and progress hub (C5).
//!
//! The worker pool shape mirrors a fixed-size pool pulling jobs from a
//! shared queue: instead of one `JobQueue` actor, each batch's dispatch loop
//! pulls directly from the tracker's pending ledgers (the ledger already
//! durably holds the remaining work, so a separate in-memory queue would
//! just be a second, poorer copy of it) and a semaphore caps how many items
//! are in flight across the whole process at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tracing::{info, instrument, warn};

use crate::clock::Clock;
use crate::detector::{DetectorClient, DetectorError, ImageRef};
use crate::model::{BatchResult, PendingFile, ProgressEvent};
use crate::notify::NotificationSink;
use crate::progress::ProgressHub;
use crate::tracker::{BatchTracker, PendingKey, TrackerError};

/// `{max_attempts, base_delay, multiplier}` applied at the boundary between
/// ingest and the detector client. Kept as a standalone value rather than
/// woven into the dispatch loop, so it can be tuned or swapped in tests
/// without touching the retry control flow itself.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_secs(1), multiplier: 2 }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * self.multiplier.pow(attempt.saturating_sub(1))
    }
}

pub struct IngestPipeline {
    tracker: Arc<BatchTracker>,
    detector: Arc<dyn DetectorClient>,
    progress: Arc<ProgressHub>,
    clock: Arc<dyn Clock>,
    notify_sink: Arc<dyn NotificationSink>,
    permits: Arc<Semaphore>,
    retry_policy: RetryPolicy,
    shutting_down: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl IngestPipeline {
    pub fn new(
        tracker: Arc<BatchTracker>,
        detector: Arc<dyn DetectorClient>,
        progress: Arc<ProgressHub>,
        clock: Arc<dyn Clock>,
        worker_concurrency: usize,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self::with_notify_sink(
            tracker,
            detector,
            progress,
            clock,
            worker_concurrency,
            retry_policy,
            Arc::new(crate::notify::NoopSink),
        )
    }

    pub fn with_notify_sink(
        tracker: Arc<BatchTracker>,
        detector: Arc<dyn DetectorClient>,
        progress: Arc<ProgressHub>,
        clock: Arc<dyn Clock>,
        worker_concurrency: usize,
        retry_policy: RetryPolicy,
        notify_sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            tracker,
            detector,
            progress,
            clock,
            notify_sink,
            permits: Arc::new(Semaphore::new(worker_concurrency.max(1))),
            retry_policy,
            shutting_down: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    /// Signals the pool to stop accepting new items. In-flight items finish
    /// within their own per-attempt timeout; no new dispatch loops spawn
    /// after this returns.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();
    }

    /// Materializes an already-validated file submission under
    /// `pending_files/`, advances the batch to `processing`, then kicks off
    /// dispatch.
    #[instrument(skip(self, files))]
    pub async fn submit_files(
        &self,
        batch_id: &str,
        files: Vec<(String, Vec<u8>)>,
    ) -> Result<(), TrackerError> {
        let store = self.tracker.store();
        store.ensure_batch_dirs(batch_id)?;
        let mut manifest = Vec::with_capacity(files.len());
        for (seq, (original_name, bytes)) in files.into_iter().enumerate() {
            let local_name = self.tracker.local_name_for(batch_id, seq as u64, &original_name);
            let path = store.pending_files_dir(batch_id).join(&local_name);
            tokio::task::spawn_blocking({
                let path = path.clone();
                move || std::fs::write(&path, bytes)
            })
            .await
            .map_err(|err| TrackerError::Store(crate::store::StoreError::Io {
                path: path.clone(),
                source: std::io::Error::other(err),
            }))?
            .map_err(|source| crate::store::StoreError::Io { path, source })?;
            manifest.push(PendingFile { local_name, original_name });
        }

        self.tracker.begin_processing(batch_id, manifest, Vec::new()).await?;
        self.dispatch(batch_id.to_string());
        Ok(())
    }

    /// Appends a URL-list submission to the URL ledger and kicks off
    /// dispatch.
    #[instrument(skip(self, urls))]
    pub async fn submit_urls(&self, batch_id: &str, urls: Vec<String>) -> Result<(), TrackerError> {
        self.tracker.begin_processing(batch_id, Vec::new(), urls).await?;
        self.dispatch(batch_id.to_string());
        Ok(())
    }

    /// Spawns the drain loop for a batch. Safe to call repeatedly (e.g. once
    /// per submission, and once from recovery at startup) — each call just
    /// races to drain whatever is currently pending; once a key is consumed
    /// by one dispatch it cannot be picked up by another.
    pub fn dispatch(&self, batch_id: String) {
        let tracker = self.tracker.clone();
        let detector = self.detector.clone();
        let progress = self.progress.clone();
        let clock = self.clock.clone();
        let notify_sink = self.notify_sink.clone();
        let permits = self.permits.clone();
        let retry_policy = self.retry_policy;
        let shutting_down = self.shutting_down.clone();

        tokio::spawn(async move {
            loop {
                if shutting_down.load(Ordering::SeqCst) {
                    info!(%batch_id, "ingest shutting down, stopping new dispatch");
                    return;
                }
                let batch = match tracker.load(&batch_id).await {
                    Ok(b) => b,
                    Err(_) => return,
                };
                if batch.status.is_terminal() {
                    return;
                }

                let keys = match tracker.peek_pending(&batch_id, permits.available_permits().max(1)).await {
                    Ok(k) => k,
                    Err(_) => return,
                };
                if keys.is_empty() {
                    return;
                }

                let mut handles = Vec::new();
                for key in keys {
                    let Ok(permit) = permits.clone().acquire_owned().await else { return };
                    let tracker = tracker.clone();
                    let detector = detector.clone();
                    let progress = progress.clone();
                    let clock = clock.clone();
                    let notify_sink = notify_sink.clone();
                    let batch_id = batch_id.clone();
                    handles.push(tokio::spawn(async move {
                        let _permit = permit;
                        process_one(
                            &tracker,
                            &*detector,
                            &progress,
                            &*clock,
                            &*notify_sink,
                            &batch_id,
                            key,
                            retry_policy,
                        )
                        .await;
                    }));
                }
                for h in handles {
                    let _ = h.await;
                }
            }
        });
    }
}

async fn process_one(
    tracker: &BatchTracker,
    detector: &dyn DetectorClient,
    progress: &ProgressHub,
    clock: &dyn Clock,
    notify_sink: &dyn NotificationSink,
    batch_id: &str,
    key: PendingKey,
    retry: RetryPolicy,
) {
    let (input_label, image_ref_owned) = match &key {
        PendingKey::Url(url) => (url.clone(), None),
        PendingKey::File(local_name) => {
            let path = tracker.store().pending_files_dir(batch_id).join(local_name);
            match tokio::fs::read(&path).await {
                Ok(bytes) => (local_name.clone(), Some(bytes)),
                Err(err) => {
                    warn!(%batch_id, %local_name, %err, "pending file blob missing, recording error result");
                    let result = BatchResult::errored(local_name.clone(), format!("missing blob: {err}"));
                    commit(tracker, progress, notify_sink, batch_id, result, key).await;
                    return;
                }
            }
        }
    };

    let mut attempt = 0u32;
    let result = loop {
        attempt += 1;
        let image_ref = match (&key, &image_ref_owned) {
            (PendingKey::Url(url), _) => ImageRef::Url(url),
            (PendingKey::File(_), Some(bytes)) => ImageRef::Bytes(bytes),
            _ => unreachable!("file key always carries bytes"),
        };

        match detector.detect(image_ref).await {
            Ok(verdict) => {
                break if verdict.error.is_some() {
                    BatchResult::errored(input_label.clone(), verdict.error.unwrap())
                } else if verdict.is_valid {
                    BatchResult::success(
                        input_label.clone(),
                        verdict.confidence.unwrap_or(0.0),
                        verdict.detected_by.unwrap_or_default(),
                        verdict.bbox,
                    )
                } else {
                    BatchResult::invalid(input_label.clone(), None)
                };
            }
            Err(DetectorError::Permanent(msg)) => {
                break BatchResult::errored(input_label.clone(), msg);
            }
            Err(DetectorError::Transient(msg)) => {
                if attempt >= retry.max_attempts {
                    break BatchResult::errored(input_label.clone(), msg);
                }
                progress.publish(
                    batch_id,
                    ProgressEvent::RetryStart { batch_id: batch_id.to_string(), retry_total: attempt },
                );
                tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
            }
        }
    };

    let _ = clock.now();
    commit(tracker, progress, notify_sink, batch_id, result, key).await;
}

async fn commit(
    tracker: &BatchTracker,
    progress: &ProgressHub,
    notify_sink: &dyn NotificationSink,
    batch_id: &str,
    result: BatchResult,
    key: PendingKey,
) {
    // Commit the Result (and atomically drop the pending key) before
    // touching the blob on disk: if the process crashes in between, the
    // blob is simply orphaned with no manifest entry, and
    // `recovery::reconcile_pending_files`'s `on_disk.difference(&manifested)`
    // branch sweeps it — the committed Result (the actual detector verdict)
    // is never lost. Deleting the blob first would risk losing that verdict
    // to a synthesized "missing blob" error on restart (P5).
    let local_name = if let PendingKey::File(name) = &key { Some(name.clone()) } else { None };

    if tracker.append_result(batch_id, result, key).await.is_err() {
        return;
    }

    if let Some(local_name) = local_name {
        tracker.store().remove_file_lenient(&tracker.store().pending_files_dir(batch_id).join(local_name));
    }

    if let Ok(batch) = tracker.load(batch_id).await {
        let (status, counts, percent) = (batch.status, batch.counts, batch.progress_percent());
        progress.publish(
            batch_id,
            ProgressEvent::Progress {
                batch_id: batch_id.to_string(),
                processed: counts.processed,
                total: batch.total.unwrap_or(0),
                percent,
                current_input: None,
                current_status: None,
            },
        );
        if status.is_terminal() {
            progress.publish(
                batch_id,
                ProgressEvent::Complete {
                    batch_id: batch_id.to_string(),
                    processed: counts.processed,
                    valid: counts.valid,
                    invalid: counts.invalid,
                    errored: counts.errored,
                },
            );
            notify_sink.notify_batch_complete(&batch).await;
        }
    }
}
