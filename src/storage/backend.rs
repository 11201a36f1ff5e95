//! Storage backend trait definition
//!
//! This module defines the `OutcomeStore` trait implemented by every durable
//! destination for check outcomes.

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::StorageResult;
use crate::CheckOutcome;

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Append-only store for check outcomes
///
/// Only the result sink writes through this trait; schedulers never touch it.
/// Implementations must be `Send + Sync` as they are shared across async tasks.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Persist a single outcome with one explicit insert
    ///
    /// Never updates or deletes existing rows. A failed insert leaves no row behind,
    /// so the caller may retry it.
    async fn insert(&self, outcome: &CheckOutcome) -> StorageResult<()>;

    /// The `limit` most recent outcomes for a URL, oldest first
    async fn query_latest(&self, target_url: &str, limit: usize)
    -> StorageResult<Vec<CheckOutcome>>;

    /// Total number of stored outcomes
    async fn count(&self) -> StorageResult<u64>;

    /// Lightweight round trip proving the backend is reachable
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Release connections; further calls may fail
    async fn close(&self) -> StorageResult<()>;
}
