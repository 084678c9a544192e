//! End-to-end scenarios run against the full router and/or the tracker
//! directly where a scenario calls for a process restart.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use chrono::Utc;
use imagevet::clock::SystemClock;
use imagevet::detector::DetectorError;
use imagevet::ingest::{IngestPipeline, RetryPolicy};
use imagevet::model::{BatchResult, BatchStatus, PendingFile};
use imagevet::progress::ProgressHub;
use imagevet::recovery;
use imagevet::store::Store;
use imagevet::tracker::{BatchTracker, PendingKey};
use serde_json::{Value, json};

#[path = "support/mod.rs"]
mod support;

use support::{ScriptedDetector, invalid_verdict, poll_until, test_router, test_server, test_state, valid_verdict};

/// S1: two URLs, one valid one invalid, processed to completion; CSV keeps
/// submission order.
#[tokio::test]
async fn s1_happy_path_two_urls() {
    let detector = Arc::new(ScriptedDetector::new(vec![
        Ok(valid_verdict(0.9, "m1", Some([1, 2, 3, 4]))),
        Ok(invalid_verdict()),
    ]));
    let (state, _dir) = test_state(detector);
    let server = test_server(test_router(state));

    let start: Value = server.post("/api/start-batch").await.json();
    let batch_id = start["batch_id"].as_str().unwrap().to_string();

    server
        .post("/api/init-batch")
        .json(&json!({ "batch_id": batch_id, "client_id": "C", "total": 2 }))
        .await
        .assert_status_ok();

    server
        .post("/api/check-logo/batch/")
        .json(&json!({ "batch_id": batch_id, "image_paths": ["http://example.com/u1", "http://example.com/u2"] }))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let status: Value = poll_until(Duration::from_secs(5), || {
        let server = &server;
        let batch_id = batch_id.clone();
        async move {
            let resp: Value = server.get(&format!("/api/check-logo/batch/{batch_id}/status")).await.json();
            if resp["status"] == "completed" { Some(resp) } else { None }
        }
    })
    .await;

    assert_eq!(status["counts"]["processed"], 2);
    assert_eq!(status["counts"]["valid"], 1);
    assert_eq!(status["counts"]["invalid"], 1);
    assert_eq!(status["counts"]["errored"], 0);

    let csv = server.get(&format!("/api/check-logo/batch/export-csv/{batch_id}")).await;
    csv.assert_status_ok();
    let body = csv.text();
    let lines: Vec<&str> = body.lines().collect();
    assert!(lines[1].contains("http://example.com/u1"));
    assert!(lines[2].contains("http://example.com/u2"));
}

/// S2: transient failures on the first two attempts, success on the third;
/// exactly one Result is recorded.
#[tokio::test]
async fn s2_retry_then_success() {
    let detector = Arc::new(ScriptedDetector::new(vec![
        Err(DetectorError::Transient("timeout".into())),
        Err(DetectorError::Transient("timeout".into())),
        Ok(valid_verdict(0.8, "m1", None)),
    ]));
    let (state, _dir) = test_state(detector);
    let server = test_server(test_router(state));

    let start: Value = server.post("/api/start-batch").await.json();
    let batch_id = start["batch_id"].as_str().unwrap().to_string();
    server
        .post("/api/init-batch")
        .json(&json!({ "batch_id": batch_id, "total": 1 }))
        .await
        .assert_status_ok();
    server
        .post("/api/check-logo/batch/")
        .json(&json!({ "batch_id": batch_id, "image_paths": ["http://example.com/u"] }))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let status: Value = poll_until(Duration::from_secs(5), || {
        let server = &server;
        let batch_id = batch_id.clone();
        async move {
            let resp: Value = server.get(&format!("/api/check-logo/batch/{batch_id}/status")).await.json();
            if resp["status"] == "completed" { Some(resp) } else { None }
        }
    })
    .await;

    assert_eq!(status["counts"]["processed"], 1);
    assert_eq!(status["counts"]["valid"], 1);
    assert_eq!(status["counts"]["errored"], 0);
}

/// S3: two of three files commit before a simulated crash; a fresh tracker
/// bound to the same store recovers and finishes the third.
#[tokio::test]
async fn s3_crash_mid_batch_recovers_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path());
    store.ensure_directories().unwrap();
    let clock = Arc::new(SystemClock);

    let tracker = BatchTracker::new(store.clone(), clock.clone());
    let id = tracker.create().await.unwrap();
    tracker.init(&id, None, 3).await.unwrap();

    store.ensure_batch_dirs(&id).unwrap();
    let blobs_dir = store.pending_files_dir(&id);
    for name in ["f1", "f2", "f3"] {
        std::fs::write(blobs_dir.join(format!("{name}.jpg")), b"fake-jpeg-bytes").unwrap();
    }

    let pending = vec![
        PendingFile { local_name: "f1.jpg".into(), original_name: "f1.jpg".into() },
        PendingFile { local_name: "f2.jpg".into(), original_name: "f2.jpg".into() },
        PendingFile { local_name: "f3.jpg".into(), original_name: "f3.jpg".into() },
    ];
    tracker.begin_processing(&id, pending, vec![]).await.unwrap();

    // f1 and f2 "complete" before the crash: commit their Results and drop
    // their blobs, exactly as `ingest::commit` would.
    for name in ["f1", "f2"] {
        std::fs::remove_file(blobs_dir.join(format!("{name}.jpg"))).unwrap();
        let result = BatchResult::success(format!("{name}.jpg"), 0.9, "m1".into(), None);
        tracker
            .append_result(&id, result, PendingKey::File(format!("{name}.jpg")))
            .await
            .unwrap();
    }

    // Simulate a restart: a fresh tracker with an empty in-memory cache,
    // reading the same on-disk store.
    let tracker2 = Arc::new(BatchTracker::new(store.clone(), clock.clone()));
    let detector = Arc::new(ScriptedDetector::always(valid_verdict(0.95, "m1", None)));
    let progress2 = Arc::new(ProgressHub::new(Duration::from_secs(60)));
    let ingest2 = Arc::new(IngestPipeline::new(
        tracker2.clone(),
        detector,
        progress2,
        clock,
        2,
        RetryPolicy::default(),
    ));

    recovery::run(&tracker2, &ingest2).await;

    let final_batch = poll_until(Duration::from_secs(5), || {
        let tracker2 = tracker2.clone();
        let id = id.clone();
        async move {
            let batch = tracker2.load(&id).await.ok()?;
            if batch.status == BatchStatus::Completed { Some(batch) } else { None }
        }
    })
    .await;

    assert_eq!(final_batch.counts.processed, 3);
    assert!(final_batch.pending.is_empty());
    let labels: Vec<&str> = final_batch.results.iter().map(|r| r.input.as_str()).collect();
    assert_eq!(labels.iter().filter(|l| **l == "f1.jpg").count(), 1);
    assert_eq!(labels.iter().filter(|l| **l == "f2.jpg").count(), 1);
    assert_eq!(labels.iter().filter(|l| **l == "f3.jpg").count(), 1);
}

/// S4: a batch with non-empty pending ledger, backdated past the hard cap,
/// is marked failed and its documents removed by the maintenance sweep.
#[tokio::test]
async fn s4_abandoned_batch_is_expired_and_removed() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path());
    store.ensure_directories().unwrap();
    let clock = Arc::new(SystemClock);

    let tracker = BatchTracker::new(store.clone(), clock.clone());
    let id = tracker.create().await.unwrap();
    tracker.init(&id, None, 2).await.unwrap();
    tracker.begin_processing(&id, vec![], vec!["u1".into(), "u2".into()]).await.unwrap();

    // Backdate the persisted document's `updated_at` past the 72h hard cap,
    // bypassing the tracker's in-memory cache.
    let doc_path = store.batch_doc_path(&id);
    let mut batch = store.read_json::<imagevet::model::Batch>(&doc_path).unwrap();
    batch.updated_at = Utc::now() - chrono::Duration::hours(73);
    store.write_json_atomic(&doc_path, &batch).unwrap();

    // Fresh tracker, as maintenance would see it after a restart or on its
    // own periodic tick against the same store.
    let tracker2 = BatchTracker::new(store.clone(), clock);
    let cfg = imagevet::maintenance::MaintenanceConfig {
        temp_age: Duration::from_secs(30 * 60),
        batch_age: Duration::from_secs(24 * 60 * 60),
        pending_age: Duration::from_secs(72 * 60 * 60),
    };
    let (batches_cleaned, pending_cleaned) = imagevet::maintenance::expire_batches(&tracker2, cfg).await;

    assert_eq!(batches_cleaned, 0);
    assert_eq!(pending_cleaned, 1);
    assert!(tracker2.load(&id).await.is_err());
    assert!(!store.pending_files_dir(&id).exists());
}

/// S5: logout without the CSRF header is forbidden; with a matching token
/// it succeeds.
#[tokio::test]
async fn s5_csrf_enforcement() {
    let detector = Arc::new(ScriptedDetector::always(valid_verdict(0.9, "m1", None)));
    let (state, _dir) = test_state(detector);
    let server = test_server(test_router(state));

    let login: Value = server
        .post("/api/admin/login")
        .form(&[("username", "admin"), ("password", "hunter2")])
        .await
        .json();
    let token = login["token"].as_str().unwrap();
    let csrf = login["csrf"].as_str().unwrap();

    let missing_csrf = server.post("/api/admin/logout").add_header("x-auth-token", token).await;
    missing_csrf.assert_status(StatusCode::FORBIDDEN);

    let ok = server
        .post("/api/admin/logout")
        .add_header("x-auth-token", token)
        .add_header("x-csrf-token", csrf)
        .await;
    ok.assert_status_ok();
}

/// S6: the manual-cleanup route is capped at 2 requests/min; the third
/// within the window is rejected with a `detail` body, independent of
/// whether the caller is authenticated (rate limiting sits outermost).
#[tokio::test]
async fn s6_rate_limit_returns_429_with_detail() {
    let detector = Arc::new(ScriptedDetector::always(valid_verdict(0.9, "m1", None)));
    let (state, _dir) = test_state(detector);
    let server = test_server(test_router(state));

    let first = server.post("/maintenance/cleanup").await;
    first.assert_status(StatusCode::UNAUTHORIZED);
    let second = server.post("/maintenance/cleanup").await;
    second.assert_status(StatusCode::UNAUTHORIZED);

    let third = server.post("/maintenance/cleanup").await;
    third.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body: Value = third.json();
    assert!(body["detail"].is_string());
}
