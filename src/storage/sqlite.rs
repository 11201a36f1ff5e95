//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `OutcomeStore` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers are not blocked by the sink's inserts
//! - **Self-bootstrapping**: Creates the outcome table and its index on startup
//! - **Append-only**: Plain `INSERT` per outcome, nothing is ever updated or deleted

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, trace, warn};

use super::backend::{HealthStatus, OutcomeStore};
use super::error::{StorageError, StorageResult};
use super::schema::{self, TableName};
use crate::{CheckOutcome, ErrorKind};

/// SQLite storage backend
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
    table: TableName,
    insert_sql: String,
}

impl SqliteStore {
    /// Open (or create) the database and make sure the outcome table exists
    ///
    /// Fails with `ConnectionFailed` if the file cannot be opened, which the binary
    /// treats as "storage unreachable at startup".
    #[instrument(skip_all, fields(table = %table))]
    pub async fn connect(db_path: impl AsRef<Path>, table: TableName) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("creating table {table} if missing");
        sqlx::query(&schema::create_table_sql(&table))
            .execute(&pool)
            .await?;
        sqlx::query(&schema::create_index_sql(&table))
            .execute(&pool)
            .await?;

        info!("SQLite backend ready");

        Ok(Self {
            pool,
            db_path: db_path_str,
            insert_sql: schema::insert_sql(&table),
            table,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
    }

    fn row_to_outcome(row: &SqliteRow) -> CheckOutcome {
        let error_kind = row
            .get::<Option<String>, _>("error_kind")
            .and_then(|kind| match kind.parse::<ErrorKind>() {
                Ok(kind) => Some(kind),
                Err(e) => {
                    warn!("ignoring stored error kind: {e}");
                    None
                }
            });

        CheckOutcome {
            target_url: row.get("target_url"),
            checked_at: Self::millis_to_timestamp(row.get("checked_at")),
            response_time_ms: row
                .get::<Option<i64>, _>("response_time_ms")
                .map(|v| v as u64),
            status_code: row.get::<Option<i64>, _>("status_code").map(|v| v as u16),
            pattern_matched: row.get("pattern_matched"),
            error_kind,
            error_detail: row.get("error_detail"),
            body_excerpt: row.get("body_excerpt"),
        }
    }
}

#[async_trait]
impl OutcomeStore for SqliteStore {
    #[instrument(skip_all, fields(url = %outcome.target_url))]
    async fn insert(&self, outcome: &CheckOutcome) -> StorageResult<()> {
        sqlx::query(&self.insert_sql)
            .bind(&outcome.target_url)
            .bind(Self::timestamp_to_millis(&outcome.checked_at))
            .bind(outcome.response_time_ms.map(|v| v as i64))
            .bind(outcome.status_code.map(i64::from))
            .bind(outcome.pattern_matched)
            .bind(outcome.error_kind.map(|kind| kind.as_str()))
            .bind(outcome.error_detail.as_deref())
            .bind(outcome.body_excerpt.as_deref())
            .execute(&self.pool)
            .await?;

        trace!("outcome stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_latest(
        &self,
        target_url: &str,
        limit: usize,
    ) -> StorageResult<Vec<CheckOutcome>> {
        let sql = format!(
            r#"
            SELECT target_url, checked_at, response_time_ms, status_code,
                   pattern_matched, error_kind, error_detail, body_excerpt
            FROM {}
            WHERE target_url = ?
            ORDER BY checked_at DESC, id DESC
            LIMIT ?
            "#,
            self.table
        );

        let rows = sqlx::query(&sql)
            .bind(target_url)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut outcomes: Vec<CheckOutcome> = rows.iter().map(Self::row_to_outcome).collect();
        // Oldest first
        outcomes.reverse();
        debug!("query returned {} outcomes", outcomes.len());
        Ok(outcomes)
    }

    async fn count(&self) -> StorageResult<u64> {
        let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as u64)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());
                metadata.insert("table".to_string(), self.table.to_string());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
