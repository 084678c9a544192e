//! Shared application state handed to every HTTP handler, mirroring the
//! teacher's `AppState` pattern: one `Clone`-able struct of `Arc`s, owned
//! components behind their own internal locking rather than one big mutex.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::detector::{DetectorClient, HttpDetectorClient};
use crate::ingest::{IngestPipeline, RetryPolicy};
use crate::middleware::rate_limit::RateLimiter;
use crate::progress::ProgressHub;
use crate::session::SessionStore;
use crate::store::Store;
use crate::tracker::BatchTracker;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
    pub tracker: Arc<BatchTracker>,
    pub progress: Arc<ProgressHub>,
    pub ingest: Arc<IngestPipeline>,
    pub detector: Arc<dyn DetectorClient>,
    pub sessions: Arc<SessionStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub notify_sink: Arc<dyn crate::notify::NotificationSink>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let detector: Arc<dyn DetectorClient> = Arc::new(HttpDetectorClient::new(
            config.detector_url.clone(),
            config.detector_timeout,
            config.confidence_threshold,
        )?);
        Self::with_detector(config, detector)
    }

    /// Builds state around a caller-supplied detector, bypassing the HTTP
    /// client entirely. Used by tests to swap in an in-process fake.
    pub fn with_detector(config: Config, detector: Arc<dyn DetectorClient>) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let store = Store::new(config.store_root.clone());
        store.ensure_directories()?;

        let clock: Arc<dyn crate::clock::Clock> = Arc::new(crate::clock::SystemClock);
        let tracker = Arc::new(BatchTracker::new(store.clone(), clock.clone()));
        let progress = Arc::new(ProgressHub::new(config.stale_window));

        let notify_sink: Arc<dyn crate::notify::NotificationSink> = match &config.smtp_host {
            Some(host) => Arc::new(crate::notify::SmtpSink { host: Some(host.clone()) }),
            None => Arc::new(crate::notify::NoopSink),
        };

        let ingest = Arc::new(IngestPipeline::with_notify_sink(
            tracker.clone(),
            detector.clone(),
            progress.clone(),
            clock,
            config.worker_concurrency,
            RetryPolicy::default(),
            notify_sink.clone(),
        ));
        let sessions = Arc::new(SessionStore::new(
            config.admin_username.clone(),
            config.admin_password.clone(),
            config.session_duration,
        ));

        Ok(Self {
            config,
            store,
            tracker,
            progress,
            ingest,
            detector,
            sessions,
            rate_limiter: Arc::new(RateLimiter::default()),
            notify_sink,
        })
    }

    pub fn maintenance_config(&self) -> crate::maintenance::MaintenanceConfig {
        crate::maintenance::MaintenanceConfig {
            temp_age: self.config.temp_age,
            batch_age: self.config.batch_age,
            pending_age: self.config.pending_age,
        }
    }

    pub fn heartbeat_period(&self) -> Duration {
        self.config.heartbeat_period
    }
}
