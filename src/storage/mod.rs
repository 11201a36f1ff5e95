//! Durable destinations for check outcomes
//!
//! ## Design
//!
//! - **Trait-based**: `OutcomeStore` lets the result sink write to SQLite in production
//!   and to memory in tests
//! - **Append-only**: one explicit `INSERT` per outcome, no updates or deletes
//! - **Last resort**: `FallbackLog` keeps outcomes the store refused, as JSON lines
//!
//! ## Usage
//!
//! ```no_run
//! use web_monitoring::config::StorageConfig;
//! use web_monitoring::storage::open_store;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = open_store(&StorageConfig::default()).await?;
//!     // Hand the store to the result sink
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod fallback;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use tracing::info;

pub use backend::{HealthStatus, OutcomeStore};
pub use error::{StorageError, StorageResult};
pub use fallback::FallbackLog;
pub use memory::MemoryStore;

use crate::config::StorageConfig;

/// Open the configured backend and verify it answers
///
/// An error here means storage is unreachable at startup, which is fatal.
pub async fn open_store(config: &StorageConfig) -> anyhow::Result<Arc<dyn OutcomeStore>> {
    let store: Arc<dyn OutcomeStore> = match config {
        StorageConfig::Memory => {
            info!("using in-memory storage, outcomes will not survive a restart");
            Arc::new(MemoryStore::new())
        }

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, table } => {
            let table = schema::TableName::parse(table)?;
            Arc::new(sqlite::SqliteStore::connect(path, table).await?)
        }

        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("SQLite storage requested but the `storage-sqlite` feature is disabled")
        }
    };

    let health = store.health_check().await?;
    if !health.healthy {
        anyhow::bail!("storage is not reachable: {}", health.message);
    }

    Ok(store)
}
