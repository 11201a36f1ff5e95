//! Result sink durability tests
//!
//! These tests verify that:
//! - A storage outage shorter than the retry budget loses nothing
//! - Beyond the retry budget every outcome lands in the fallback log
//! - A full buffer diverts instead of blocking forever
//! - Outcomes reach a real SQLite table in arrival order

use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;
use web_monitoring::CheckOutcome;
use web_monitoring::actors::messages::Offer;
use web_monitoring::config::SinkConfig;

use crate::helpers::*;

fn outcome(i: usize) -> CheckOutcome {
    let mut outcome = CheckOutcome::new(format!("https://site-{i}.example.com/"), Utc::now());
    outcome.status_code = Some(200);
    outcome.response_time_ms = Some(i as u64);
    outcome
}

#[tokio::test]
async fn test_short_outage_loses_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let sink = memory_sink(&dir, &fast_sink_config());
    sink.store.set_available(false);

    for i in 0..5 {
        assert_eq!(sink.sink.record(outcome(i)).await, Offer::Buffered);
    }

    // Retry budget is 20 + 40 + 80 + 160 + 200 ms
    tokio::time::sleep(Duration::from_millis(100)).await;
    sink.store.set_available(true);

    let stats = sink.sink.shutdown(Duration::from_secs(5)).await;

    assert_eq!(stats.persisted, 5);
    assert_eq!(stats.diverted, 0);
    assert!(stats.retries > 0);
    assert!(sink.fallback.read_all().await.unwrap().is_empty());

    let stored: Vec<_> = sink
        .store
        .snapshot()
        .into_iter()
        .map(|o| o.target_url)
        .collect();
    let expected: Vec<_> = (0..5)
        .map(|i| format!("https://site-{i}.example.com/"))
        .collect();
    assert_eq!(stored, expected);
}

#[tokio::test]
async fn test_long_outage_fills_fallback_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = SinkConfig {
        max_retries: 2,
        initial_backoff_ms: 10,
        max_backoff_ms: 20,
        ..fast_sink_config()
    };
    let sink = memory_sink(&dir, &config);
    sink.store.set_available(false);

    for i in 0..4 {
        sink.sink.record(outcome(i)).await;
    }
    sink.sink.flush().await.unwrap();

    let stats = sink.sink.stats();
    assert_eq!(stats.received, 4);
    assert_eq!(stats.persisted, 0);
    assert_eq!(stats.retries, 8);
    assert_eq!(stats.diverted, 4);

    let preserved = sink.fallback.read_all().await.unwrap();
    let urls: Vec<_> = preserved.iter().map(|o| o.target_url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://site-0.example.com/",
            "https://site-1.example.com/",
            "https://site-2.example.com/",
            "https://site-3.example.com/",
        ]
    );
    assert_eq!(preserved[2], outcome_like(&preserved[2], 2));
}

// Same as `outcome(i)` but with the recorded timestamp
fn outcome_like(stored: &CheckOutcome, i: usize) -> CheckOutcome {
    CheckOutcome {
        checked_at: stored.checked_at,
        ..outcome(i)
    }
}

#[tokio::test]
async fn test_full_buffer_diverts_after_record_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let config = SinkConfig {
        buffer_capacity: 1,
        record_timeout_ms: 50,
        max_retries: 1_000,
        initial_backoff_ms: 100,
        max_backoff_ms: 100,
        ..fast_sink_config()
    };
    let sink = memory_sink(&dir, &config);
    sink.store.set_available(false);

    // The actor is stuck retrying the first outcome, the second fills the buffer
    let mut offers = Vec::new();
    for i in 0..4 {
        offers.push(sink.sink.record(outcome(i)).await);
    }

    assert_eq!(offers[0], Offer::Buffered);
    assert_eq!(offers[3], Offer::Diverted);
    let diverted = offers.iter().filter(|o| **o == Offer::Diverted).count();
    assert_eq!(sink.fallback.read_all().await.unwrap().len(), diverted);

    sink.store.set_available(true);
    let stats = sink.sink.shutdown(Duration::from_secs(5)).await;
    assert_eq!(stats.persisted as usize + diverted, 4);
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_outcomes_reach_sqlite_in_order() {
    use std::sync::Arc;
    use web_monitoring::actors::sink::SinkHandle;
    use web_monitoring::storage::schema::TableName;
    use web_monitoring::storage::sqlite::SqliteStore;
    use web_monitoring::storage::{FallbackLog, OutcomeStore};

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteStore::connect(
            dir.path().join("monitor.db"),
            TableName::parse("site_checks").unwrap(),
        )
        .await
        .unwrap(),
    );
    let sink = SinkHandle::spawn(
        store.clone(),
        FallbackLog::new(dir.path().join("undelivered.jsonl")),
        &fast_sink_config(),
    );

    let base = Utc::now();
    for i in 0..20 {
        let mut outcome = CheckOutcome::new("https://example.com/", base + chrono::Duration::seconds(i));
        outcome.status_code = Some(200);
        outcome.response_time_ms = Some(i as u64);
        sink.record(outcome).await;
    }
    let stats = sink.shutdown(Duration::from_secs(5)).await;
    assert_eq!(stats.persisted, 20);

    let latest = store.query_latest("https://example.com/", 5).await.unwrap();
    let times: Vec<_> = latest.iter().map(|o| o.response_time_ms.unwrap()).collect();
    assert_eq!(times, vec![15, 16, 17, 18, 19]);
    assert_eq!(store.count().await.unwrap(), 20);
    store.close().await.unwrap();
}
