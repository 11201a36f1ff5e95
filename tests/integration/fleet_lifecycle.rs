//! End-to-end fleet tests
//!
//! These tests verify that:
//! - One cycle over real HTTP endpoints stores exactly one outcome per target
//! - A target that always times out over HTTP keeps firing at its interval
//! - Shutdown with many probes in flight records every completed probe exactly once
//! - A probe finishing during shutdown is preserved even when the sink buffer is full
//! - Probes still running after the grace period are aborted
//! - A panicking scheduler is restarted without affecting other targets

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::{self, Instant};
use web_monitoring::actors::fleet::{Fleet, FleetSettings};
use web_monitoring::actors::messages::SchedulerPhase;
use web_monitoring::config::{ProbeConfig, SinkConfig};
use web_monitoring::probe::HttpProbe;
use web_monitoring::{CheckOutcome, ErrorKind};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_one_cycle_over_http() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/healthy"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let healthy = format!("{}/healthy", mock_server.uri());
    let broken = format!("{}/broken", mock_server.uri());
    let unreachable = "http://127.0.0.1:1/".to_string();
    let registry = registry(vec![
        entry(&healthy, 5, Some("OK")),
        entry(&broken, 5, None),
        entry(&unreachable, 5, None),
    ]);

    let dir = tempfile::tempdir().unwrap();
    let sink = memory_sink(&dir, &fast_sink_config());
    let probe = Arc::new(HttpProbe::new(ProbeConfig::default()).unwrap());

    let fleet = Fleet::start(&registry, probe, sink.sink.clone(), fleet_settings(8));
    let store = sink.store.clone();
    assert!(wait_until(Duration::from_secs(4), || store.snapshot().len() >= 3).await);

    let report = fleet.stop().await;
    sink.sink.shutdown(Duration::from_secs(5)).await;
    assert_eq!(report.aborted, 0);

    let outcomes: HashMap<String, CheckOutcome> = sink
        .store
        .snapshot()
        .into_iter()
        .map(|o| (o.target_url.clone(), o))
        .collect();
    assert_eq!(outcomes.len(), 3);
    assert_eq!(sink.store.snapshot().len(), 3);

    let ok = &outcomes[&healthy];
    assert_eq!(ok.status_code, Some(200));
    assert_eq!(ok.pattern_matched, Some(true));
    assert_eq!(ok.error_kind, None);

    let server_error = &outcomes[&broken];
    assert_eq!(server_error.status_code, Some(500));
    assert_eq!(server_error.pattern_matched, None);
    assert_eq!(server_error.error_kind, None);

    let refused = &outcomes[&unreachable];
    assert_eq!(refused.status_code, None);
    assert_eq!(refused.error_kind, Some(ErrorKind::ConnectionFailed));
}

#[tokio::test]
async fn test_always_timing_out_http_target_keeps_firing() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&mock_server)
        .await;

    let url = format!("{}/slow", mock_server.uri());
    let registry = registry(vec![entry(&url, 5, None)]);
    let dir = tempfile::tempdir().unwrap();
    let sink = memory_sink(&dir, &fast_sink_config());
    let probe = Arc::new(
        HttpProbe::new(ProbeConfig {
            timeout_ceiling_ms: 300,
            ..ProbeConfig::default()
        })
        .unwrap(),
    );

    let fleet = Fleet::start(&registry, probe, sink.sink.clone(), fleet_settings(4));
    let store = sink.store.clone();
    assert!(wait_until(Duration::from_secs(15), || store.snapshot().len() >= 3).await);

    let report = fleet.stop().await;
    sink.sink.shutdown(Duration::from_secs(5)).await;
    assert_eq!(report.aborted, 0);
    assert_eq!(report.stopped, 1);

    let outcomes = sink.store.snapshot();
    assert!(outcomes.len() >= 3);
    for outcome in &outcomes {
        assert_eq!(outcome.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(outcome.status_code, None);
        assert_eq!(outcome.response_time_ms, None);
    }
    for pair in outcomes.windows(2) {
        let gap = (pair[1].checked_at - pair[0].checked_at).num_milliseconds();
        assert!((4_500..=5_500).contains(&gap), "fires {gap} ms apart");
    }

    // Every fire opened its own request; none piled up behind a stuck one
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), outcomes.len());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_with_fifty_probes_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let sink = memory_sink(&dir, &fast_sink_config());
    let probe = Arc::new(ScriptedProbe::new(Duration::from_secs(2)));
    let registry = many_targets(50, 30);

    let fleet = Fleet::start(&registry, probe.clone(), sink.sink.clone(), fleet_settings(64));
    time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fleet.in_flight(), 50);

    let started = Instant::now();
    let report = fleet.stop().await;
    let stats = sink.sink.shutdown(Duration::from_secs(5)).await;

    assert!(started.elapsed() <= Duration::from_secs(10));
    assert_eq!(report.stopped, 50);
    assert_eq!(report.aborted, 0);
    assert_eq!(stats.persisted, 50);

    let mut per_target: HashMap<String, usize> = HashMap::new();
    for outcome in sink.store.snapshot() {
        *per_target.entry(outcome.target_url).or_default() += 1;
    }
    assert_eq!(per_target.len(), 50);
    assert!(per_target.values().all(|count| *count == 1));
}

#[tokio::test(start_paused = true)]
async fn test_outcome_finished_during_shutdown_survives_full_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let sink_config = SinkConfig {
        buffer_capacity: 1,
        max_retries: 1_000,
        initial_backoff_ms: 50,
        max_backoff_ms: 50,
        ..SinkConfig::default()
    };
    let sink = memory_sink(&dir, &sink_config);
    sink.store.set_available(false);

    // One outcome stuck in retries, one occupying the only buffer slot
    for filler in ["https://filler-1.example.com/", "https://filler-2.example.com/"] {
        sink.sink.record(CheckOutcome::new(filler, chrono::Utc::now())).await;
    }

    let probe = Arc::new(ScriptedProbe::new(Duration::from_secs(9)));
    let registry = registry(vec![entry("https://slow.example.com/", 30, None)]);
    let fleet = Fleet::start(&registry, probe.clone(), sink.sink.clone(), fleet_settings(4));
    time::sleep(Duration::from_millis(100)).await;

    let report = fleet.stop().await;
    assert_eq!(report.aborted, 0);
    assert_eq!(report.stopped, 1);
    assert_eq!(probe.total_calls(), 1);

    sink.store.set_available(true);
    sink.sink.shutdown(Duration::from_secs(5)).await;

    let slow = "https://slow.example.com/";
    let stored = sink.store.snapshot().iter().filter(|o| o.target_url == slow).count();
    let preserved = sink
        .fallback
        .read_all()
        .await
        .unwrap()
        .iter()
        .filter(|o| o.target_url == slow)
        .count();
    assert_eq!(stored + preserved, 1);
    assert_eq!(preserved, 1);
}

#[tokio::test(start_paused = true)]
async fn test_probes_past_grace_period_are_aborted() {
    let dir = tempfile::tempdir().unwrap();
    let sink = memory_sink(&dir, &fast_sink_config());
    let probe = Arc::new(ScriptedProbe::new(Duration::from_secs(60)));
    let registry = many_targets(5, 300);
    let settings = FleetSettings {
        shutdown_grace: Duration::from_secs(1),
        ..fleet_settings(8)
    };

    let fleet = Fleet::start(&registry, probe.clone(), sink.sink.clone(), settings);
    time::sleep(Duration::from_millis(100)).await;

    let report = fleet.stop().await;
    let stats = sink.sink.shutdown(Duration::from_secs(1)).await;

    assert_eq!(report.aborted, 5);
    assert_eq!(report.stopped, 0);
    assert!(report.elapsed >= Duration::from_secs(1));
    assert!(report.elapsed < Duration::from_secs(2));
    assert_eq!(stats.received, 0);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_scheduler_is_restarted() {
    let dir = tempfile::tempdir().unwrap();
    let sink = memory_sink(&dir, &fast_sink_config());
    let probe = Arc::new(
        ScriptedProbe::new(Duration::from_millis(100)).panicking_once("https://fragile.example.com/"),
    );
    let registry = registry(vec![
        entry("https://fragile.example.com/", 10, None),
        entry("https://steady.example.com/", 10, None),
    ]);

    let fleet = Fleet::start(&registry, probe.clone(), sink.sink.clone(), fleet_settings(8));

    // Waiting out the restart delay, nothing is in flight for the fragile target
    time::sleep(Duration::from_millis(500)).await;
    let fragile_now = fleet
        .stats()
        .into_iter()
        .find(|s| s.url == "https://fragile.example.com/")
        .unwrap();
    assert_eq!(fragile_now.restarts, 1);
    assert_eq!(fragile_now.phase, SchedulerPhase::Idle);

    time::sleep(Duration::from_millis(2_500)).await;

    let stats: HashMap<String, _> = fleet
        .stats()
        .into_iter()
        .map(|s| (s.url.clone(), s))
        .collect();
    fleet.stop().await;
    sink.sink.shutdown(Duration::from_secs(5)).await;

    let fragile = &stats["https://fragile.example.com/"];
    assert_eq!(fragile.restarts, 1);
    assert_eq!(fragile.fires, 1);
    assert_eq!(fragile.phase, SchedulerPhase::Idle);

    let steady = &stats["https://steady.example.com/"];
    assert_eq!(steady.restarts, 0);
    assert_eq!(steady.fires, 1);

    // The restarted scheduler fired after the one-second restart delay
    let fragile_calls = probe.calls_for("https://fragile.example.com/");
    let steady_calls = probe.calls_for("https://steady.example.com/");
    assert_eq!(fragile_calls.len(), 1);
    assert_eq!(fragile_calls[0] - steady_calls[0], Duration::from_secs(1));

    assert_eq!(sink.store.snapshot().len(), 2);
}
