//! SinkActor - Persists check outcomes, one explicit insert at a time
//!
//! ## Delivery
//!
//! Schedulers offer outcomes through `SinkHandle::record`. The buffer between them and
//! the actor is bounded:
//! - **Backpressure**: a full buffer makes the caller wait up to `record_timeout`
//! - **Diversion**: if it is still full (or the sink is closed) the caller writes the
//!   outcome to the fallback log itself
//! - **Shutdown**: `record_until` gives up waiting once its stop signal fires and
//!   diverts right away
//!
//! ## Failure Handling
//!
//! A failed insert is retried with exponential backoff. Once the retries are used up
//! the outcome is appended to the fallback log and a `persistence_failed` event is
//! logged. Nothing is dropped silently; duplicates are possible, losses are not.
//!
//! ```text
//! record() ──► [bounded buffer] ──► SinkActor ──► store.insert()
//!    │                                  │ retries exhausted
//!    └── full/closed ──► FallbackLog ◄──┘
//! ```

use std::future;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{Offer, SinkCommand, SinkCounters, SinkStats};
use crate::CheckOutcome;
use crate::config::SinkConfig;
use crate::storage::{FallbackLog, OutcomeStore, StorageError};
use crate::util::Backoff;

/// Actor that owns the store connection and writes outcomes in arrival order
pub struct SinkActor {
    store: Arc<dyn OutcomeStore>,
    fallback: FallbackLog,
    config: SinkConfig,
    outcome_rx: mpsc::Receiver<CheckOutcome>,
    command_rx: mpsc::Receiver<SinkCommand>,
    counters: Arc<SinkCounters>,
}

impl SinkActor {
    /// Run the actor's main loop
    ///
    /// Exits after a `Shutdown` command, or once every handle is gone and the buffer
    /// is empty.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting sink actor");

        loop {
            tokio::select! {
                biased;

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SinkCommand::Flush { respond_to } => {
                            self.flush().await;
                            let _ = respond_to.send(());
                        }

                        SinkCommand::Shutdown { timeout, respond_to } => {
                            self.drain(timeout).await;
                            let _ = respond_to.send(self.counters.snapshot());
                            break;
                        }
                    }
                }

                Some(outcome) = self.outcome_rx.recv() => {
                    self.persist(outcome).await;
                }

                else => {
                    debug!("all sink handles dropped");
                    break;
                }
            }
        }

        debug!("sink actor stopped");
    }

    /// Persist whatever is buffered right now
    async fn flush(&mut self) {
        let mut flushed = 0;
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            self.persist(outcome).await;
            flushed += 1;
        }
        trace!("flushed {flushed} outcomes");
    }

    /// Close the buffer and persist what is left until `timeout` runs out
    async fn drain(&mut self, timeout: Duration) {
        self.outcome_rx.close();
        let deadline = Instant::now() + timeout;
        let mut drained = 0u64;
        let mut diverted = 0u64;

        while let Some(outcome) = self.outcome_rx.recv().await {
            if Instant::now() >= deadline {
                self.divert(&outcome).await;
                diverted += 1;
                continue;
            }

            // An insert cut off here may still land, so the copy in the fallback log
            // can be a duplicate
            let pending = outcome.clone();
            if time::timeout_at(deadline, self.persist(outcome)).await.is_err() {
                warn!(url = %pending.target_url, "flush timeout hit during insert");
                self.divert(&pending).await;
                diverted += 1;
            } else {
                drained += 1;
            }
        }

        info!("sink drained: {drained} persisted, {diverted} diverted to fallback log");
    }

    /// Insert with retries; after the last one the outcome goes to the fallback log
    async fn persist(&mut self, outcome: CheckOutcome) {
        let write_timeout = Duration::from_millis(self.config.write_timeout_ms);
        let mut backoff = Backoff::new(
            Duration::from_millis(self.config.initial_backoff_ms),
            Duration::from_millis(self.config.max_backoff_ms),
        );
        let mut attempt = 0u32;

        loop {
            let error = match time::timeout(write_timeout, self.store.insert(&outcome)).await {
                Ok(Ok(())) => {
                    self.counters.persisted.fetch_add(1, Ordering::Relaxed);
                    if attempt > 0 {
                        info!(url = %outcome.target_url, "outcome stored after {attempt} retries");
                    }
                    return;
                }
                Ok(Err(e)) => e,
                Err(_) => StorageError::Timeout(self.config.write_timeout_ms),
            };

            if attempt >= self.config.max_retries {
                error!(
                    event = "persistence_failed",
                    url = %outcome.target_url,
                    attempts = attempt + 1,
                    "giving up on outcome: {error}"
                );
                self.divert(&outcome).await;
                return;
            }

            attempt += 1;
            self.counters.retries.fetch_add(1, Ordering::Relaxed);
            let delay = backoff.next_delay();
            warn!(
                url = %outcome.target_url,
                "insert failed ({error}), retry {attempt}/{} in {} ms",
                self.config.max_retries,
                delay.as_millis()
            );
            time::sleep(delay).await;
        }
    }

    async fn divert(&self, outcome: &CheckOutcome) {
        self.counters.diverted.fetch_add(1, Ordering::Relaxed);
        self.fallback.preserve(outcome).await;
    }
}

/// Handle for offering outcomes to the SinkActor
#[derive(Clone)]
pub struct SinkHandle {
    outcome_tx: mpsc::Sender<CheckOutcome>,
    command_tx: mpsc::Sender<SinkCommand>,
    fallback: FallbackLog,
    counters: Arc<SinkCounters>,
    record_timeout: Duration,
}

impl SinkHandle {
    /// Spawn a new sink actor writing to `store`
    pub fn spawn(store: Arc<dyn OutcomeStore>, fallback: FallbackLog, config: &SinkConfig) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::channel(config.buffer_capacity);
        let (command_tx, command_rx) = mpsc::channel(32);
        let counters = Arc::new(SinkCounters::default());

        let actor = SinkActor {
            store,
            fallback: fallback.clone(),
            config: config.clone(),
            outcome_rx,
            command_rx,
            counters: counters.clone(),
        };

        tokio::spawn(actor.run());

        Self {
            outcome_tx,
            command_tx,
            fallback,
            counters,
            record_timeout: Duration::from_millis(config.record_timeout_ms),
        }
    }

    /// Offer one outcome; waits while the buffer is full, up to the record timeout
    pub async fn record(&self, outcome: CheckOutcome) -> Offer {
        self.offer(outcome, future::pending()).await
    }

    /// Like `record`, but stops waiting for buffer space as soon as `stop` resolves
    ///
    /// Schedulers pass their shutdown signal here so that a finished probe is never held
    /// up past the fleet's grace period by a full buffer.
    pub async fn record_until(
        &self,
        outcome: CheckOutcome,
        stop: impl Future<Output = ()>,
    ) -> Offer {
        self.offer(outcome, stop).await
    }

    async fn offer(&self, outcome: CheckOutcome, stop: impl Future<Output = ()>) -> Offer {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let reserved = tokio::select! {
            biased;
            reserved = time::timeout(self.record_timeout, self.outcome_tx.reserve()) => match reserved {
                Ok(Ok(permit)) => Ok(permit),
                Ok(Err(_)) => Err("sink closed"),
                Err(_) => Err("sink buffer full"),
            },
            _ = stop => Err("stopping with a full sink buffer"),
        };

        match reserved {
            Ok(permit) => {
                permit.send(outcome);
                Offer::Buffered
            }
            Err(reason) => {
                warn!(url = %outcome.target_url, "{reason}, diverting outcome");
                self.counters.diverted.fetch_add(1, Ordering::Relaxed);
                self.fallback.preserve(&outcome).await;
                Offer::Diverted
            }
        }
    }

    /// Wait until everything buffered so far has been handled
    pub async fn flush(&self) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(SinkCommand::Flush { respond_to: tx })
            .await?;
        rx.await?;
        Ok(())
    }

    pub fn stats(&self) -> SinkStats {
        self.counters.snapshot()
    }

    /// Outcomes waiting in the buffer
    pub fn buffered(&self) -> usize {
        self.outcome_tx.max_capacity() - self.outcome_tx.capacity()
    }

    /// Drain within `timeout` and stop the actor
    ///
    /// Outcomes recorded afterwards through other clones of this handle are diverted.
    pub async fn shutdown(self, timeout: Duration) -> SinkStats {
        let (tx, rx) = oneshot::channel();
        let sent = self
            .command_tx
            .send(SinkCommand::Shutdown {
                timeout,
                respond_to: tx,
            })
            .await;

        if sent.is_err() {
            warn!("sink actor already stopped");
            return self.counters.snapshot();
        }

        rx.await.unwrap_or_else(|_| self.counters.snapshot())
    }
}

// ============================================================================
// Tests
// ============================================================================
