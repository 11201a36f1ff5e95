//! In-memory storage backend (no persistence)
//!
//! Useful for:
//! - Testing the sink and the fleet without database dependencies
//! - Dry runs (`"backend": "memory"`)
//!
//! The store can be switched to "unavailable" to simulate a storage outage; while
//! unavailable every call fails with `StorageError::Unavailable` and nothing is kept.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use super::backend::{HealthStatus, OutcomeStore};
use super::error::{StorageError, StorageResult};
use crate::CheckOutcome;

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryStore {
    outcomes: Mutex<Vec<CheckOutcome>>,
    unavailable: AtomicBool,
    failed_inserts: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage (`false`) or its recovery (`true`)
    pub fn set_available(&self, available: bool) {
        debug!("in-memory store available: {available}");
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of inserts rejected while unavailable
    pub fn failed_inserts(&self) -> u64 {
        self.failed_inserts.load(Ordering::SeqCst)
    }

    /// Everything stored so far, in insertion order
    pub fn snapshot(&self) -> Vec<CheckOutcome> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CheckOutcome>> {
        // A poisoned lock only means a panicking test thread; the data is still usable
        self.outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable(
                "in-memory store switched off".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl OutcomeStore for MemoryStore {
    async fn insert(&self, outcome: &CheckOutcome) -> StorageResult<()> {
        if let Err(e) = self.ensure_available() {
            self.failed_inserts.fetch_add(1, Ordering::SeqCst);
            return Err(e);
        }

        self.lock().push(outcome.clone());
        Ok(())
    }

    async fn query_latest(
        &self,
        target_url: &str,
        limit: usize,
    ) -> StorageResult<Vec<CheckOutcome>> {
        self.ensure_available()?;

        let outcomes = self.lock();
        let matching: Vec<_> = outcomes
            .iter()
            .filter(|o| o.target_url == target_url)
            .collect();
        let skip = matching.len().saturating_sub(limit);

        Ok(matching.into_iter().skip(skip).cloned().collect())
    }

    async fn count(&self) -> StorageResult<u64> {
        self.ensure_available()?;
        Ok(self.lock().len() as u64)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let healthy = !self.unavailable.load(Ordering::SeqCst);
        let mut metadata = HashMap::new();
        metadata.insert("backend".to_string(), "memory".to_string());

        Ok(HealthStatus {
            healthy,
            message: if healthy {
                "In-memory storage: operational".to_string()
            } else {
                "In-memory storage: unavailable".to_string()
            },
            metadata,
        })
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}
