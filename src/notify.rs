//! Fire-and-forget notification sink. SMTP delivery details are explicitly
//! out of scope; this module implements the seam (a trait plus a no-op
//! default), not an SMTP client.

use async_trait::async_trait;
use tracing::debug;

use crate::model::Batch;

#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn notify_batch_complete(&self, batch: &Batch);
}

#[derive(Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn notify_batch_complete(&self, _batch: &Batch) {}
}

/// Stub SMTP sink: logs the intent to notify without opening a socket.
/// Wiring an actual SMTP client is out of this crate's scope (spec
/// explicitly excludes "SMTP delivery" details).
#[derive(Debug)]
pub struct SmtpSink {
    pub host: Option<String>,
}

#[async_trait]
impl NotificationSink for SmtpSink {
    async fn notify_batch_complete(&self, batch: &Batch) {
        debug!(
            batch_id = %batch.id,
            email = ?batch.email,
            smtp_host = ?self.host,
            "would notify batch completion by email"
        );
    }
}
