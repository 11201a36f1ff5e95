//! TargetScheduler - Fires the probe for one target at a fixed rate
//!
//! ## Timing
//!
//! The first fire happens after a per-URL offset so that a large fleet does not start
//! in lockstep. After that the schedule is fixed-rate: the next fire is the previous
//! *scheduled* time plus the interval, so probe duration does not cause drift. If that
//! time has already passed the probe fires right away and the schedule restarts from
//! now; missed fires are never replayed.
//!
//! ## State Machine
//!
//! ```text
//! Idle ──(due + permit)──► Firing ──(outcome recorded)──► Idle
//!   │                                                      │
//!   └──────────────(shutdown)──────► Stopped ◄──(shutdown)─┘
//! ```
//!
//! A scheduler that is sleeping or waiting for a permit stops as soon as shutdown is
//! signalled. An in-flight probe always finishes and its outcome is recorded first.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, instrument, trace, warn};

use super::messages::{Offer, SchedulerPhase, TargetStats};
use super::sink::SinkHandle;
use crate::probe::Probe;
use crate::registry::MonitoredTarget;

/// Lateness below this is timer jitter, not a missed fire
const OVERDUE_TOLERANCE: Duration = Duration::from_millis(5);

/// Scheduler-owned state; only the scheduler's own loop touches it
#[derive(Debug)]
pub struct SchedulerState {
    pub last_fire: Option<Instant>,
    pub phase: SchedulerPhase,
    pub consecutive_failures: u64,
}

/// Actor that drives all probes of a single target
pub struct TargetScheduler {
    target: Arc<MonitoredTarget>,
    probe: Arc<dyn Probe>,
    sink: SinkHandle,
    permits: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
    stats: Arc<TargetStats>,
    first_fire_delay: Duration,
    late_warning: Duration,
    state: SchedulerState,
}

impl TargetScheduler {
    /// Build a scheduler; `stats` may come from a previous run of the same target
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        target: Arc<MonitoredTarget>,
        probe: Arc<dyn Probe>,
        sink: SinkHandle,
        permits: Arc<Semaphore>,
        shutdown: watch::Receiver<bool>,
        stats: Arc<TargetStats>,
        first_fire_delay: Duration,
        late_warning: Duration,
    ) -> Self {
        stats.set_phase(SchedulerPhase::Idle);

        Self {
            target,
            probe,
            sink,
            permits,
            shutdown,
            stats,
            first_fire_delay,
            late_warning,
            state: SchedulerState {
                last_fire: None,
                phase: SchedulerPhase::Idle,
                consecutive_failures: 0,
            },
        }
    }

    /// Run the scheduler's main loop until shutdown is signalled
    #[instrument(skip(self), fields(url = %self.target.url()))]
    pub async fn run(mut self) {
        let period = self.target.interval();
        debug!(
            "scheduling every {}s, first fire in {} ms",
            period.as_secs(),
            self.first_fire_delay.as_millis()
        );

        // Delay: an overdue tick fires at once and later ticks count from there
        let mut ticker = time::interval_at(Instant::now() + self.first_fire_delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let scheduled = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => break,
                scheduled = ticker.tick() => scheduled,
            };

            let overdue = scheduled.elapsed();
            if self.state.last_fire.is_some() && overdue > OVERDUE_TOLERANCE {
                debug!("fire overdue by {} ms, resynchronizing", overdue.as_millis());
            }
            let waiting_since = Instant::now();

            let permit = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        debug!("probe slots closed");
                        break;
                    }
                },
            };

            let waited = waiting_since.elapsed();
            if waited > self.late_warning {
                warn!("probe started {} ms late, all probe slots were busy", waited.as_millis());
            }

            self.set_phase(SchedulerPhase::Firing);
            self.state.last_fire = Some(Instant::now());
            let outcome = self.probe.execute(&self.target).await;
            drop(permit);

            self.state.consecutive_failures = self.stats.record_fire(outcome.is_failure());
            if let Some(kind) = outcome.error_kind {
                debug!(
                    "probe failed: {kind} ({} in a row)",
                    self.state.consecutive_failures
                );
            } else {
                trace!("probe ok: status {:?}", outcome.status_code);
            }

            // Once shutdown is signalled a full buffer must not hold the outcome past
            // the grace period, so it goes to the fallback log instead
            let offer = self
                .sink
                .record_until(outcome, shutdown_requested(&mut self.shutdown))
                .await;
            if offer == Offer::Diverted {
                debug!("outcome diverted to fallback log");
            }
            self.set_phase(SchedulerPhase::Idle);
        }

        self.set_phase(SchedulerPhase::Stopped);
        debug!("scheduler stopped");
    }

    fn set_phase(&mut self, phase: SchedulerPhase) {
        self.state.phase = phase;
        self.stats.set_phase(phase);
    }
}

/// Resolves once shutdown is signalled or the signalling side is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

// ============================================================================
// Tests
// ============================================================================
