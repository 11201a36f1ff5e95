//! Fleet supervisor - one scheduler per target, a shared probe budget, bounded shutdown
//!
//! ## Isolation
//!
//! Every scheduler runs in its own task under a small supervisor loop. A panic inside a
//! scheduler (or inside the probe it drives) is caught there, logged, counted, and the
//! scheduler is started again after `restart_delay`. Other targets never notice.
//!
//! ## Shutdown
//!
//! `FleetHandle::stop` flips a watch channel. Idle schedulers exit at once; those with a
//! probe in flight finish it and record the outcome, diverting to the fallback log
//! rather than waiting on a full sink buffer. Whatever is still running when the grace
//! period ends is aborted.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{error, info, instrument, warn};

use super::messages::{SchedulerPhase, TargetStats, TargetStatsSnapshot};
use super::scheduler::TargetScheduler;
use super::sink::SinkHandle;
use crate::config::FleetConfig;
use crate::probe::Probe;
use crate::registry::{MonitoredTarget, Registry};
use crate::util::stable_jitter;

/// Runtime knobs for the fleet, derived from `FleetConfig`
#[derive(Debug, Clone)]
pub struct FleetSettings {
    pub max_in_flight: usize,
    pub startup_jitter: Duration,
    pub late_warning: Duration,
    pub restart_delay: Duration,
    pub shutdown_grace: Duration,
}

impl From<&FleetConfig> for FleetSettings {
    fn from(config: &FleetConfig) -> Self {
        Self {
            max_in_flight: config.max_in_flight,
            startup_jitter: Duration::from_secs(config.startup_jitter_secs),
            late_warning: Duration::from_secs(config.late_warning_secs),
            restart_delay: Duration::from_millis(config.restart_delay_ms),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self::from(&FleetConfig::default())
    }
}

/// How a fleet shutdown went
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Schedulers that stopped on their own within the grace period
    pub stopped: usize,

    /// Schedulers that had to be cancelled
    pub aborted: usize,

    pub elapsed: Duration,
}

pub struct Fleet;

impl Fleet {
    /// Start one supervised scheduler per registry target
    #[instrument(skip_all, fields(targets = registry.len()))]
    pub fn start(
        registry: &Registry,
        probe: Arc<dyn Probe>,
        sink: SinkHandle,
        settings: FleetSettings,
    ) -> FleetHandle {
        let permits = Arc::new(Semaphore::new(settings.max_in_flight));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut members = Vec::with_capacity(registry.len());

        for target in registry.targets() {
            let stats = Arc::new(TargetStats::new(target.url().as_str()));
            let jitter_spread = settings.startup_jitter.min(target.interval());
            let supervisor = Supervisor {
                target: target.clone(),
                probe: probe.clone(),
                sink: sink.clone(),
                permits: permits.clone(),
                shutdown: shutdown_rx.clone(),
                stats: stats.clone(),
                first_fire_delay: stable_jitter(target.url().as_str(), jitter_spread),
                late_warning: settings.late_warning,
                restart_delay: settings.restart_delay,
            };

            members.push(Member {
                stats,
                task: tokio::spawn(supervisor.run()),
            });
        }

        info!(
            "fleet started: {} targets, at most {} probes in flight",
            members.len(),
            settings.max_in_flight
        );

        FleetHandle {
            shutdown_tx,
            members,
            permits,
            max_in_flight: settings.max_in_flight,
            shutdown_grace: settings.shutdown_grace,
        }
    }
}

struct Member {
    stats: Arc<TargetStats>,
    task: JoinHandle<()>,
}

/// Handle to a running fleet
///
/// Dropping the handle without calling `stop` also signals shutdown, but does not wait.
pub struct FleetHandle {
    shutdown_tx: watch::Sender<bool>,
    members: Vec<Member>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    shutdown_grace: Duration,
}

impl FleetHandle {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Probes currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.permits.available_permits()
    }

    pub fn stats(&self) -> Vec<TargetStatsSnapshot> {
        self.members.iter().map(|m| m.stats.snapshot()).collect()
    }

    /// Signal shutdown and wait up to the grace period; abort whatever is left
    #[instrument(skip(self))]
    pub async fn stop(self) -> ShutdownReport {
        let started = Instant::now();
        let deadline = started + self.shutdown_grace;
        info!(
            "stopping fleet, {} probes in flight, grace {} s",
            self.in_flight(),
            self.shutdown_grace.as_secs()
        );

        let _ = self.shutdown_tx.send(true);

        let mut stopped = 0;
        let mut aborted = 0;
        for mut member in self.members {
            match time::timeout_at(deadline, &mut member.task).await {
                Ok(_) => stopped += 1,
                Err(_) => {
                    let url = member.stats.snapshot().url;
                    warn!(url = %url, "scheduler still busy after grace period, aborting");
                    member.task.abort();
                    let _ = member.task.await;
                    aborted += 1;
                }
            }
        }

        let report = ShutdownReport {
            stopped,
            aborted,
            elapsed: started.elapsed(),
        };
        info!(
            "fleet stopped in {} ms ({} stopped, {} aborted)",
            report.elapsed.as_millis(),
            report.stopped,
            report.aborted
        );
        report
    }
}

/// Restarts a target's scheduler whenever it panics
struct Supervisor {
    target: Arc<MonitoredTarget>,
    probe: Arc<dyn Probe>,
    sink: SinkHandle,
    permits: Arc<Semaphore>,
    shutdown: watch::Receiver<bool>,
    stats: Arc<TargetStats>,
    first_fire_delay: Duration,
    late_warning: Duration,
    restart_delay: Duration,
}

impl Supervisor {
    async fn run(self) {
        let mut first_fire_delay = self.first_fire_delay;

        loop {
            let scheduler = TargetScheduler::new(
                self.target.clone(),
                self.probe.clone(),
                self.sink.clone(),
                self.permits.clone(),
                self.shutdown.clone(),
                self.stats.clone(),
                first_fire_delay,
                self.late_warning,
            );

            match AssertUnwindSafe(scheduler.run()).catch_unwind().await {
                Ok(()) => break,
                Err(panic) => {
                    let restarts = self.stats.record_restart();
                    error!(
                        url = %self.target.url(),
                        restarts,
                        "scheduler panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }

            if *self.shutdown.borrow() {
                self.stats.set_phase(SchedulerPhase::Stopped);
                break;
            }
            // The restarted scheduler still reacts to shutdown during this delay
            first_fire_delay = self.restart_delay;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
