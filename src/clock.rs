//! C1: Clock & IDs — a monotonic time source and UUID generation, factored
//! behind a trait so tests can substitute a controllable clock without
//! touching the wall clock.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Source of truth for "now" and opaque identifiers. The default
/// implementation is the system wall clock; tests may swap in a fake.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
    fn new_id(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn new_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Deterministic local-name generator for on-disk pending file blobs:
/// `<batch_id>-<seq>-<sanitized-original-extension>`.
pub fn local_name_for(batch_id: &str, seq: u64, original_name: &str) -> String {
    let ext = std::path::Path::new(original_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    format!("{batch_id}-{seq:06}.{ext}")
}
