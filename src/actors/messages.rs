//! Message and stats types shared by the actors
//!
//! ## Design Principles
//!
//! 1. **Commands**: request/response messages sent to the sink actor via mpsc
//! 2. **Snapshots**: plain `Clone` values copied out of shared counters, never live views

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;

/// Commands that can be sent to the result sink actor
#[derive(Debug)]
pub enum SinkCommand {
    /// Persist everything currently buffered, then answer
    Flush { respond_to: oneshot::Sender<()> },

    /// Stop accepting outcomes, drain the buffer within `timeout` and divert the rest
    /// to the fallback log
    Shutdown {
        timeout: Duration,
        respond_to: oneshot::Sender<SinkStats>,
    },
}

/// What happened to an offered outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Queued for the store
    Buffered,

    /// The buffer stayed full or was closed; the outcome went to the fallback log
    Diverted,
}

/// Result sink counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Outcomes offered through `record`
    pub received: u64,

    /// Outcomes the store accepted
    pub persisted: u64,

    /// Insert attempts repeated after a failure
    pub retries: u64,

    /// Outcomes written to the fallback log instead of the store
    pub diverted: u64,
}

#[derive(Debug, Default)]
pub(crate) struct SinkCounters {
    pub received: AtomicU64,
    pub persisted: AtomicU64,
    pub retries: AtomicU64,
    pub diverted: AtomicU64,
}

impl SinkCounters {
    pub fn snapshot(&self) -> SinkStats {
        SinkStats {
            received: self.received.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            diverted: self.diverted.load(Ordering::Relaxed),
        }
    }
}

/// Where a target's scheduler currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerPhase {
    /// Waiting for the next fire time or a probe slot
    Idle = 0,

    /// A probe is in flight
    Firing = 1,

    Stopped = 2,
}

impl SchedulerPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SchedulerPhase::Firing,
            2 => SchedulerPhase::Stopped,
            _ => SchedulerPhase::Idle,
        }
    }
}

/// Per-target counters, shared between a scheduler and the fleet
#[derive(Debug)]
pub struct TargetStats {
    url: String,
    fires: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU64,
    restarts: AtomicU64,
    phase: AtomicU8,
}

impl TargetStats {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            fires: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            phase: AtomicU8::new(SchedulerPhase::Idle as u8),
        }
    }

    pub(crate) fn set_phase(&self, phase: SchedulerPhase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    pub(crate) fn record_fire(&self, failed: bool) -> u64 {
        self.fires.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            0
        }
    }

    pub(crate) fn record_restart(&self) -> u64 {
        self.restarts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> TargetStatsSnapshot {
        TargetStatsSnapshot {
            url: self.url.clone(),
            fires: self.fires.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            phase: SchedulerPhase::from_u8(self.phase.load(Ordering::Relaxed)),
        }
    }
}

/// Point-in-time copy of one target's counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetStatsSnapshot {
    pub url: String,

    /// Probes executed to completion
    pub fires: u64,

    /// Completed probes whose outcome carried an error
    pub failures: u64,

    pub consecutive_failures: u64,

    /// Times the scheduler was restarted after a panic
    pub restarts: u64,

    pub phase: SchedulerPhase,
}
