#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_test::TestServer;
use imagevet::config::Config;
use imagevet::detector::{DetectorClient, DetectorError, ImageRef, Verdict};
use imagevet::routes::create_app;
use imagevet::state::AppState;
use tempfile::TempDir;
use tokio::sync::Mutex;

/// A detector double that hands out a scripted sequence of responses, one
/// per call, falling back to a fixed default once the script is exhausted.
pub struct ScriptedDetector {
    script: Mutex<Vec<Result<Verdict, DetectorError>>>,
    default: Verdict,
}

impl ScriptedDetector {
    pub fn new(mut script: Vec<Result<Verdict, DetectorError>>) -> Self {
        script.reverse();
        Self { script: Mutex::new(script), default: valid_verdict(0.9, "m1", Some([1, 2, 3, 4])) }
    }

    pub fn always(verdict: Verdict) -> Self {
        Self { script: Mutex::new(Vec::new()), default: verdict }
    }
}

#[async_trait::async_trait]
impl DetectorClient for ScriptedDetector {
    async fn detect(&self, _image_ref: ImageRef<'_>) -> Result<Verdict, DetectorError> {
        let mut script = self.script.lock().await;
        match script.pop() {
            Some(response) => response,
            None => Ok(self.default.clone()),
        }
    }
}

pub fn valid_verdict(confidence: f64, detected_by: &str, bbox: Option<[i64; 4]>) -> Verdict {
    Verdict { is_valid: true, confidence: Some(confidence), detected_by: Some(detected_by.into()), bbox, error: None }
}

pub fn invalid_verdict() -> Verdict {
    Verdict { is_valid: false, confidence: None, detected_by: None, bbox: None, error: None }
}

/// Builds an `AppState` rooted in a throwaway directory, with the given
/// detector standing in for the real HTTP client. The returned `TempDir`
/// must be kept alive for as long as the state is in use.
pub fn test_state(detector: Arc<dyn DetectorClient>) -> (AppState, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        server_host: "127.0.0.1".into(),
        server_port: 0,
        admin_username: "admin".into(),
        admin_password: "hunter2".into(),
        session_duration: Duration::from_secs(900),
        cookie_secret: "test-secret".into(),
        detector_url: "http://127.0.0.1:0".into(),
        detector_timeout: Duration::from_secs(5),
        confidence_threshold: 0.5,
        store_root: dir.path().to_path_buf(),
        worker_concurrency: 4,
        temp_age: Duration::from_secs(30 * 60),
        batch_age: Duration::from_secs(24 * 60 * 60),
        pending_age: Duration::from_secs(72 * 60 * 60),
        heartbeat_period: Duration::from_secs(30),
        stale_window: Duration::from_secs(60),
        temp_sweep_period: Duration::from_secs(30 * 60),
        batch_expiry_period: Duration::from_secs(60 * 60),
        session_expiry_period: Duration::from_secs(15 * 60),
        archive_item_threshold: 300,
        smtp_host: None,
        smtp_port: None,
        smtp_from: None,
    };
    let state = AppState::with_detector(config, detector).expect("build state");
    (state, dir)
}

pub fn test_router(state: AppState) -> Router {
    create_app(state)
}

/// A `TestServer` wired with a real transport so `ConnectInfo<SocketAddr>`
/// (used by the rate limiter) resolves to a real peer address.
pub fn test_server(router: Router) -> TestServer {
    let make_service = router.into_make_service_with_connect_info::<SocketAddr>();
    TestServer::builder()
        .http_transport()
        .build(make_service)
        .expect("build test server")
}

/// Polls `f` until it returns `Some`, or panics after `timeout`.
pub async fn poll_until<T, F, Fut>(timeout: Duration, mut f: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = f().await {
            return value;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("poll_until timed out");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
