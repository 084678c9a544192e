//! C4: Batch tracker — authoritative state machine, durable commit of
//! every state change, counter arithmetic, result append.
//!
//! Each batch has an in-memory guard (`Arc<Mutex<Batch>>`) that also serves
//! as its per-batch lock: all mutating operations on a given batch serialize
//! through that lock, while operations on different batches run in
//! parallel. The guarded `Batch` is the in-memory cache; the on-disk
//! document, written through [`crate::store::Store::write_json_atomic`], is
//! the source of truth after a restart — every mutation persists before the
//! lock is released.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::clock::{Clock, local_name_for};
use crate::model::{Batch, BatchResult, BatchStatus, BatchSummary, PendingFile};
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("batch {0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type TrackerResult<T> = Result<T, TrackerError>;

/// Which pending ledger a given in-flight item belongs to, and the key that
/// identifies it for removal once its Result is committed.
#[derive(Debug, Clone)]
pub enum PendingKey {
    File(String),
    Url(String),
}

pub struct BatchTracker {
    store: Store,
    clock: Arc<dyn Clock>,
    /// Per-batch guard doubling as the in-memory cache and the exclusive
    /// lock required by the spec's concurrency model.
    batches: DashMap<String, Arc<Mutex<Batch>>>,
}

impl BatchTracker {
    pub fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock, batches: DashMap::new() }
    }

    fn guard_for(&self, id: &str) -> Arc<Mutex<Batch>> {
        self.batches
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Batch::new(id.to_string()))))
            .clone()
    }

    /// Inserts a freshly loaded/created batch's guard, replacing any
    /// placeholder created by a concurrent reader. Used by recovery at
    /// startup.
    pub fn install(&self, batch: Batch) {
        self.batches.insert(batch.id.clone(), Arc::new(Mutex::new(batch)));
    }

    /// Persists the batch document and mirrors its pending ledger to the
    /// two spec-named export files (`pending_urls.json`,
    /// `pending_files.json`). The embedded `batch.pending` field is what
    /// recovery actually trusts — it is written atomically alongside the
    /// rest of the document, so a crash can never leave results and ledger
    /// state disagreeing with each other. The two mirror files exist purely
    /// to produce the externally-documented on-disk layout; they are
    /// derived, not authoritative, and recovery never reads them.
    pub fn persist(&self, batch: &Batch) -> TrackerResult<()> {
        self.store.ensure_batch_dirs(&batch.id)?;
        self.store.write_json_atomic(&self.store.batch_doc_path(&batch.id), batch)?;
        self.store
            .write_json_atomic(&self.store.pending_files_manifest_path(&batch.id), &batch.pending.files)?;
        self.store.write_json_atomic(&self.store.pending_urls_path(&batch.id), &batch.pending.urls)?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn create(&self) -> TrackerResult<String> {
        let id = self.clock.new_id();
        let batch = Batch::new(id.clone());
        self.persist(&batch)?;
        self.batches.insert(id.clone(), Arc::new(Mutex::new(batch)));
        info!(batch_id = %id, "batch created");
        Ok(id)
    }

    #[instrument(skip(self))]
    pub async fn init(&self, id: &str, client_id: Option<String>, total: u64) -> TrackerResult<()> {
        let guard = self.guard_for(id);
        let mut batch = guard.lock().await;
        if !self.store.document_exists(&self.store.batch_doc_path(id)) {
            return Err(TrackerError::NotFound(id.to_string()));
        }

        match batch.status {
            BatchStatus::Created => {
                batch.client_id = client_id;
                batch.total = Some(total);
                batch.status = BatchStatus::Initialized;
                batch.updated_at = self.clock.now();
                if total == 0 {
                    batch.status = BatchStatus::Completed;
                    batch.completed_at = Some(self.clock.now());
                }
                self.persist(&batch)?;
                Ok(())
            }
            BatchStatus::Initialized | BatchStatus::Processing | BatchStatus::Completed
                if batch.total == Some(total) =>
            {
                // P7: idempotent init with the same total is a no-op.
                Ok(())
            }
            _ => Err(TrackerError::Conflict(format!(
                "batch {id} already initialized with a different total"
            ))),
        }
    }

    /// Attaches submission-time metadata (`client_id`, `email`) to an
    /// already-created batch. Called right after `create()` when the
    /// start-batch form carried either field, since `Batch::new` has no way
    /// to know them yet.
    #[instrument(skip(self))]
    pub async fn set_metadata(
        &self,
        id: &str,
        client_id: Option<String>,
        email: Option<String>,
    ) -> TrackerResult<()> {
        let guard = self.guard_for(id);
        let mut batch = guard.lock().await;
        if !self.store.document_exists(&self.store.batch_doc_path(id)) {
            return Err(TrackerError::NotFound(id.to_string()));
        }
        if client_id.is_some() {
            batch.client_id = client_id;
        }
        if email.is_some() {
            batch.email = email;
        }
        batch.updated_at = self.clock.now();
        self.persist(&batch)?;
        Ok(())
    }

    pub async fn load(&self, id: &str) -> TrackerResult<Batch> {
        let guard = self.guard_for(id);
        let batch = guard.lock().await;
        if !self.store.document_exists(&self.store.batch_doc_path(id)) {
            return Err(TrackerError::NotFound(id.to_string()));
        }
        Ok(batch.clone())
    }

    /// Registers materialized pending work and advances the batch to
    /// `processing`. Called by the ingest pipeline once files/URLs have been
    /// written to their ledgers.
    #[instrument(skip(self, files, urls))]
    pub async fn begin_processing(
        &self,
        id: &str,
        files: Vec<PendingFile>,
        urls: Vec<String>,
    ) -> TrackerResult<()> {
        let guard = self.guard_for(id);
        let mut batch = guard.lock().await;
        if !self.store.document_exists(&self.store.batch_doc_path(id)) {
            return Err(TrackerError::NotFound(id.to_string()));
        }
        if !matches!(batch.status, BatchStatus::Initialized | BatchStatus::Processing) {
            return Err(TrackerError::Conflict(format!(
                "batch {id} is not accepting submissions in status {:?}",
                batch.status
            )));
        }
        batch.pending.files.extend(files);
        batch.pending.urls.extend(urls);
        batch.status = BatchStatus::Processing;
        batch.updated_at = self.clock.now();
        self.persist(&batch)?;
        Ok(())
    }

    /// Pops up to `n` pending items for dispatch. Items stay recorded in the
    /// ledger until [`Self::append_result`] removes them — a crash between
    /// pop and commit just means the worker is handed the same item again on
    /// the next drain pass, since it was never removed.
    pub async fn peek_pending(&self, id: &str, n: usize) -> TrackerResult<Vec<PendingKey>> {
        let guard = self.guard_for(id);
        let batch = guard.lock().await;
        let mut out = Vec::with_capacity(n);
        for f in batch.pending.files.iter().take(n) {
            out.push(PendingKey::File(f.local_name.clone()));
        }
        let remaining = n.saturating_sub(out.len());
        for u in batch.pending.urls.iter().take(remaining) {
            out.push(PendingKey::Url(u.clone()));
        }
        Ok(out)
    }

    /// C4 `AppendResult`: appends the result, increments counters, and
    /// removes `consumed_pending_key` from its ledger as a single atomic
    /// document replacement. Idempotent: if the key is already absent (a
    /// re-applied commit after crash-restart) this is a no-op beyond
    /// re-persisting the unchanged document.
    #[instrument(skip(self, result))]
    pub async fn append_result(
        &self,
        id: &str,
        result: BatchResult,
        consumed_pending_key: PendingKey,
    ) -> TrackerResult<()> {
        let guard = self.guard_for(id);
        let mut batch = guard.lock().await;

        if batch.status.is_terminal() {
            // P4: no Results may be appended once terminal.
            return Ok(());
        }

        let removed = match &consumed_pending_key {
            PendingKey::File(local_name) => {
                let before = batch.pending.files.len();
                batch.pending.files.retain(|f| &f.local_name != local_name);
                before != batch.pending.files.len()
            }
            PendingKey::Url(url) => {
                let before = batch.pending.urls.len();
                batch.pending.urls.retain(|u| u != url);
                before != batch.pending.urls.len()
            }
        };

        if removed {
            match result.is_valid {
                crate::model::Verdict::Valid if result.error.is_none() => batch.counts.valid += 1,
                _ if result.error.is_some() => batch.counts.errored += 1,
                _ => batch.counts.invalid += 1,
            }
            batch.counts.processed += 1;
            batch.results.push(result);
        }

        batch.updated_at = self.clock.now();

        let total_known = batch.total.unwrap_or(u64::MAX);
        if batch.counts.processed >= total_known && batch.pending.is_empty() {
            batch.status = BatchStatus::Completed;
            batch.completed_at = Some(self.clock.now());
        }

        self.persist(&batch)?;
        Ok(())
    }

    pub async fn status(&self, id: &str) -> TrackerResult<(BatchStatus, crate::model::Counts, u64)> {
        let batch = self.load(id).await?;
        Ok((batch.status, batch.counts, batch.progress_percent()))
    }

    /// Forces closure; legal only from `processing` with both ledgers
    /// empty.
    pub async fn complete(&self, id: &str) -> TrackerResult<Vec<BatchResult>> {
        let guard = self.guard_for(id);
        let mut batch = guard.lock().await;
        if !self.store.document_exists(&self.store.batch_doc_path(id)) {
            return Err(TrackerError::NotFound(id.to_string()));
        }
        if !batch.pending.is_empty() {
            return Err(TrackerError::Conflict(format!("batch {id} still has pending work")));
        }
        if batch.status == BatchStatus::Processing {
            batch.status = BatchStatus::Completed;
            batch.completed_at = Some(self.clock.now());
            batch.updated_at = self.clock.now();
            self.persist(&batch)?;
        }
        Ok(batch.results.clone())
    }

    /// Marks a batch failed, e.g. when the pending-age hard cap is
    /// exceeded by the maintenance scheduler.
    pub async fn mark_failed(&self, id: &str) -> TrackerResult<()> {
        let guard = self.guard_for(id);
        let mut batch = guard.lock().await;
        if batch.status.is_terminal() {
            return Ok(());
        }
        batch.status = BatchStatus::Failed;
        batch.updated_at = self.clock.now();
        batch.completed_at = Some(self.clock.now());
        self.persist(&batch)?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> TrackerResult<()> {
        self.batches.remove(id);
        self.store.remove_dir_all_lenient(&self.store.exports_dir(id));
        self.store.remove_file_lenient(&self.store.batch_doc_path(id));
        Ok(())
    }

    /// Lists every batch document on disk, for the admin batch-history
    /// route and for the recovery/maintenance scans.
    pub fn list_all(&self) -> TrackerResult<Vec<BatchSummary>> {
        let mut out = Vec::new();
        for entry in self.store.list_entries(&self.store.data_dir())? {
            if entry.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(batch) = self.store.read_json::<Batch>(&entry) {
                out.push(BatchSummary::from(&batch));
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    pub fn local_name_for(&self, batch_id: &str, seq: u64, original_name: &str) -> String {
        local_name_for(batch_id, seq, original_name)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}
