//! Actor-based monitoring engine
//!
//! Each actor runs as an independent async task communicating via Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │   Fleet (main)   │
//!                 └────────┬─────────┘
//!                          │ spawns one per target
//!             ┌────────────┼────────────┐
//!             │            │            │
//!     ┌───────▼───────┐    │    ┌───────▼───────┐
//!     │ Scheduler-1   │    │    │ Scheduler-N   │
//!     │ (site A)      │    │    │ (site N)      │
//!     └───────┬───────┘    │    └───────┬───────┘
//!             │   Semaphore (max in flight)
//!             └────────────┼────────────┘
//!                          │ record(outcome)
//!                ┌─────────▼──────────┐
//!                │  Bounded mpsc      │
//!                └─────────┬──────────┘
//!                          │
//!                ┌─────────▼──────────┐       ┌─────────────┐
//!                │    SinkActor       ├──────►│ FallbackLog │
//!                └─────────┬──────────┘       └─────────────┘
//!                          │ INSERT
//!                    OutcomeStore
//! ```
//!
//! ## Actor Types
//!
//! - **TargetScheduler**: fires the probe for one target at a fixed rate
//! - **Fleet**: supervises the schedulers, restarts them after a panic, stops them
//! - **SinkActor**: persists outcomes with retries and a fallback log
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: the sink has an mpsc command channel for control messages
//! 2. **Shutdown**: a watch channel reaches every scheduler at once
//! 3. **Request/Response**: oneshot channels for flush and shutdown acknowledgements

pub mod fleet;
pub mod messages;
pub mod scheduler;
pub mod sink;
