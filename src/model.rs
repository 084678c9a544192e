//! Core data types shared across the orchestration components.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a batch across its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Created,
    Initialized,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

/// Monotone counters tracked against a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub processed: u64,
    pub valid: u64,
    pub invalid: u64,
    pub errored: u64,
}

impl Counts {
    /// P1: processed == valid + invalid + errored.
    pub fn is_consistent(&self) -> bool {
        self.processed == self.valid + self.invalid + self.errored
    }
}

/// Four integers `[x1,y1,x2,y2]`.
pub type BBox = [i64; 4];

/// Per-image verdict. Modeled as a sum so at most one of the "valid" fields
/// or `error` is ever populated for an attempted item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub input: String,
    pub is_valid: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BBox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Valid,
    Invalid,
}

impl BatchResult {
    pub fn success(input: String, confidence: f64, detected_by: String, bbox: Option<BBox>) -> Self {
        Self {
            input,
            is_valid: Verdict::Valid,
            confidence: Some(confidence),
            detected_by: Some(detected_by),
            bbox,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn invalid(input: String, reason: Option<String>) -> Self {
        Self {
            input,
            is_valid: Verdict::Invalid,
            confidence: None,
            detected_by: None,
            bbox: None,
            error: reason,
            timestamp: Utc::now(),
        }
    }

    pub fn errored(input: String, message: String) -> Self {
        Self {
            input,
            is_valid: Verdict::Invalid,
            confidence: None,
            detected_by: None,
            bbox: None,
            error: Some(message),
            timestamp: Utc::now(),
        }
    }
}

/// A single remaining file the ingest pipeline still owes a Result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingFile {
    /// Sanitized on-disk name under `pending_files/`.
    pub local_name: String,
    /// Name as submitted by the client, used as `Result.input`.
    pub original_name: String,
}

/// The durable remaining-work ledgers backing recovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingLedgers {
    #[serde(default)]
    pub files: Vec<PendingFile>,
    #[serde(default)]
    pub urls: VecDeque<String>,
}

impl PendingLedgers {
    pub fn len(&self) -> usize {
        self.files.len() + self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The unit of work, serialized verbatim as `<root>/data/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    pub counts: Counts,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub results: Vec<BatchResult>,
    #[serde(default)]
    pub pending: PendingLedgers,
}

impl Batch {
    pub fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            client_id: None,
            email: None,
            total: None,
            counts: Counts::default(),
            status: BatchStatus::Created,
            created_at: now,
            updated_at: now,
            completed_at: None,
            results: Vec::new(),
            pending: PendingLedgers::default(),
        }
    }

    pub fn progress_percent(&self) -> u64 {
        let total = self.total.unwrap_or(0).max(1);
        (100 * self.counts.processed / total).min(100)
    }
}

/// Lightweight projection returned by the admin batch-history listing.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub id: String,
    pub status: BatchStatus,
    pub counts: Counts,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Batch> for BatchSummary {
    fn from(b: &Batch) -> Self {
        Self {
            id: b.id.clone(),
            status: b.status,
            counts: b.counts,
            created_at: b.created_at,
            updated_at: b.updated_at,
        }
    }
}

/// An authenticated admin session with sliding expiry.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub username: String,
    pub csrf_nonce: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// A progress-hub subscription: one bidirectional-channel holder.
#[derive(Debug, Clone)]
pub struct ClientSubscription {
    pub client_id: String,
    pub last_seen: DateTime<Utc>,
    pub batch_ids: Vec<String>,
}

/// Wire-level events pushed to subscribers. Wire-agnostic; serialized as
/// JSON text frames over the bidirectional channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress {
        batch_id: String,
        processed: u64,
        total: u64,
        percent: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_input: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        current_status: Option<String>,
    },
    RetryStart {
        batch_id: String,
        retry_total: u32,
    },
    Complete {
        batch_id: String,
        processed: u64,
        valid: u64,
        invalid: u64,
        errored: u64,
    },
    HeartbeatAck {
        ts: i64,
    },
}

/// Helper id generator; see [`crate::clock`].
pub fn new_batch_id() -> String {
    Uuid::new_v4().to_string()
}
