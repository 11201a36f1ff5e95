//! Table layout for check outcomes
//!
//! One append-only table, one row per probe. Every measurement that can be absent
//! (response time, status, pattern result, error) is a nullable column so that a
//! failed probe is stored with exactly what was measurable.
//!
//! The table name comes from configuration, so it is validated as a plain SQL
//! identifier before it is ever interpolated into a statement.

use std::fmt;

use crate::config::ConfigError;

/// A validated SQL identifier (ASCII letters, digits, underscores; no leading digit)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName(String);

impl TableName {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

        if valid_start && valid_rest && name.len() <= 63 {
            Ok(Self(name.to_string()))
        } else {
            Err(ConfigError::InvalidTableName(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `CREATE TABLE` for the outcome table; `checked_at` is stored as unix milliseconds
pub fn create_table_sql(table: &TableName) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            target_url TEXT NOT NULL,
            checked_at INTEGER NOT NULL,
            response_time_ms INTEGER,
            status_code INTEGER,
            pattern_matched INTEGER,
            error_kind TEXT,
            error_detail TEXT,
            body_excerpt TEXT
        )
        "#
    )
}

/// Index backing "latest outcomes for a URL" lookups
pub fn create_index_sql(table: &TableName) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_url_checked_at ON {table} (target_url, checked_at)"
    )
}

pub fn insert_sql(table: &TableName) -> String {
    format!(
        r#"
        INSERT INTO {table} (
            target_url, checked_at, response_time_ms, status_code,
            pattern_matched, error_kind, error_detail, body_excerpt
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#
    )
}
