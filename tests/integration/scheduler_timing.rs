//! Scheduling tests on a paused clock
//!
//! These tests verify that:
//! - Fire times follow a fixed rate regardless of probe duration
//! - A target whose probe always times out keeps firing at its interval
//! - The fleet-wide probe limit is respected and late probes still run
//! - Startup jitter spreads first fires without exceeding the interval

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::{self, Instant};
use web_monitoring::ErrorKind;
use web_monitoring::actors::fleet::{Fleet, FleetSettings};

use crate::helpers::*;

fn offsets_secs(start: Instant, calls: &[Instant]) -> Vec<u64> {
    calls.iter().map(|at| (*at - start).as_secs()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_ten_fires_span_forty_five_seconds() {
    let dir = tempfile::tempdir().unwrap();
    let sink = memory_sink(&dir, &fast_sink_config());
    let probe = Arc::new(ScriptedProbe::new(Duration::from_secs(1)));
    let registry = registry(vec![entry("https://example.com/", 5, None)]);

    let start = Instant::now();
    let fleet = Fleet::start(&registry, probe.clone(), sink.sink.clone(), fleet_settings(4));

    time::sleep(Duration::from_millis(45_500)).await;
    fleet.stop().await;
    sink.sink.shutdown(Duration::from_secs(5)).await;

    let calls = probe.calls_for("https://example.com/");
    assert_eq!(calls.len(), 10);
    assert_eq!(calls[9] - calls[0], Duration::from_secs(45));
    assert_eq!(
        offsets_secs(start, &calls),
        vec![0, 5, 10, 15, 20, 25, 30, 35, 40, 45]
    );
    assert_eq!(sink.store.snapshot().len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_always_timing_out_target_keeps_firing() {
    let dir = tempfile::tempdir().unwrap();
    let sink = memory_sink(&dir, &fast_sink_config());
    let probe = Arc::new(
        ScriptedProbe::new(Duration::from_secs(4)).failing_with(ErrorKind::Timeout),
    );
    let registry = registry(vec![entry("https://hanging.example.com/", 5, None)]);

    let start = Instant::now();
    let fleet = Fleet::start(&registry, probe.clone(), sink.sink.clone(), fleet_settings(4));

    time::sleep(Duration::from_secs(32)).await;
    let stats = fleet.stats();
    fleet.stop().await;
    sink.sink.shutdown(Duration::from_secs(5)).await;

    assert_eq!(
        offsets_secs(start, &probe.calls_for("https://hanging.example.com/")),
        vec![0, 5, 10, 15, 20, 25, 30]
    );

    let outcomes = sink.store.snapshot();
    assert_eq!(outcomes.len(), 7);
    assert!(
        outcomes
            .iter()
            .all(|o| o.error_kind == Some(ErrorKind::Timeout) && o.status_code.is_none())
    );

    assert_eq!(stats[0].fires, 6);
    assert_eq!(stats[0].failures, 6);
    assert_eq!(stats[0].consecutive_failures, 6);
}

#[tokio::test(start_paused = true)]
async fn test_probe_limit_delays_but_never_drops() {
    let dir = tempfile::tempdir().unwrap();
    let sink = memory_sink(&dir, &fast_sink_config());
    let probe = Arc::new(ScriptedProbe::new(Duration::from_secs(1)));
    let registry = many_targets(10, 30);

    let fleet = Fleet::start(&registry, probe.clone(), sink.sink.clone(), fleet_settings(3));

    time::sleep(Duration::from_millis(500)).await;
    assert_eq!(fleet.in_flight(), 3);

    time::sleep(Duration::from_secs(5)).await;
    fleet.stop().await;
    sink.sink.shutdown(Duration::from_secs(5)).await;

    assert_eq!(probe.peak_in_flight(), 3);
    assert_eq!(probe.total_calls(), 10);
    assert_eq!(sink.store.snapshot().len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_startup_jitter_stays_within_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let sink = memory_sink(&dir, &fast_sink_config());
    let probe = Arc::new(ScriptedProbe::new(Duration::from_millis(10)));
    let registry = many_targets(20, 5);
    let settings = FleetSettings {
        startup_jitter: Duration::from_secs(60),
        ..fleet_settings(32)
    };

    let start = Instant::now();
    let fleet = Fleet::start(&registry, probe.clone(), sink.sink.clone(), settings);

    time::sleep(Duration::from_secs(6)).await;
    fleet.stop().await;

    // The offset is capped by the 5 s interval, not the 60 s jitter setting
    let mut first_fires = Vec::new();
    for target in registry.targets() {
        let calls = probe.calls_for(target.url().as_str());
        assert!(!calls.is_empty(), "{} never fired", target.url());
        assert!(calls[0] - start < Duration::from_secs(5));
        first_fires.push(calls[0]);
    }

    first_fires.sort();
    first_fires.dedup();
    assert!(first_fires.len() > 1, "all targets fired at the same instant");
}
