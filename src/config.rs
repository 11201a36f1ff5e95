use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::{info, trace};

use crate::storage::schema::TableName;
use crate::util;

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence, for tests and dry runs)
    Memory,

    /// SQLite database (default)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Table receiving one row per check outcome
        #[serde(default = "default_table")]
        table: String,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            table: default_table(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./monitoring.db")
}

fn default_table() -> String {
    "check_outcomes".to_string()
}

/// Fleet-wide scheduling limits
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Probes allowed in flight at once across all targets
    pub max_in_flight: usize,

    /// Upper bound for the first-fire offset of each target
    pub startup_jitter_secs: u64,

    /// How long in-flight probes may run after shutdown was requested
    pub shutdown_grace_secs: u64,

    /// Waiting longer than this for a probe slot is logged
    pub late_warning_secs: u64,

    /// Pause before a crashed scheduler is restarted
    pub restart_delay_ms: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 256,
            startup_jitter_secs: 5,
            shutdown_grace_secs: 10,
            late_warning_secs: 2,
            restart_delay_ms: 1000,
        }
    }
}

/// How a single probe is executed
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Absolute upper bound for one request
    pub timeout_ceiling_ms: u64,

    /// The timeout always stays at least this far below the target interval
    pub timeout_margin_ms: u64,

    /// Status codes counted as success; `None` records any status without an error
    pub expected_status: Option<Vec<u16>>,

    /// Bytes of body read for pattern matching
    pub max_body_bytes: usize,

    /// Bytes of body stored with the outcome; 0 disables capture
    pub capture_body_bytes: usize,

    pub user_agent: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ceiling_ms: 30_000,
            timeout_margin_ms: 1_000,
            expected_status: None,
            max_body_bytes: 10 * 1024 * 1024,
            capture_body_bytes: 0,
            user_agent: concat!("webmonitor/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Result sink buffering and retry policy
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Outcomes buffered between schedulers and the storage actor
    pub buffer_capacity: usize,

    /// Longest a scheduler waits on a full buffer before diverting to the fallback log
    pub record_timeout_ms: u64,

    /// Retries per outcome after the first failed insert
    pub max_retries: u32,

    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,

    /// Upper bound for a single insert statement
    pub write_timeout_ms: u64,

    /// Time allowed to drain the buffer on shutdown
    pub flush_timeout_secs: u64,

    /// JSON-lines file receiving outcomes that could not be stored
    pub fallback_path: PathBuf,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024,
            record_timeout_ms: 2_000,
            max_retries: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            write_timeout_ms: 5_000,
            flush_timeout_secs: 5,
            fallback_path: PathBuf::from("./undelivered-outcomes.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub fleet: FleetConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub sink: SinkConfig,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid table name '{0}': use letters, digits and underscores, not starting with a digit")]
    InvalidTableName(String),

    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),

    #[error("sink.initial_backoff_ms ({initial}) exceeds sink.max_backoff_ms ({max})")]
    BackoffOrder { initial: u64, max: u64 },

    #[error("invalid expected status code {0}")]
    InvalidStatus(u16),
}

impl Config {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let StorageConfig::Sqlite { table, .. } = &self.storage {
            TableName::parse(table)?;
        }

        let positive = [
            ("fleet.max_in_flight", self.fleet.max_in_flight as u64),
            ("probe.timeout_ceiling_ms", self.probe.timeout_ceiling_ms),
            ("probe.max_body_bytes", self.probe.max_body_bytes as u64),
            ("sink.buffer_capacity", self.sink.buffer_capacity as u64),
            ("sink.record_timeout_ms", self.sink.record_timeout_ms),
            ("sink.max_backoff_ms", self.sink.max_backoff_ms),
            ("sink.write_timeout_ms", self.sink.write_timeout_ms),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::MustBePositive(name));
        }

        if self.sink.initial_backoff_ms > self.sink.max_backoff_ms {
            return Err(ConfigError::BackoffOrder {
                initial: self.sink.initial_backoff_ms,
                max: self.sink.max_backoff_ms,
            });
        }

        if let Some(codes) = &self.probe.expected_status {
            if let Some(code) = codes.iter().find(|c| !(100..=599).contains(*c)) {
                return Err(ConfigError::InvalidStatus(*code));
            }
        }

        Ok(())
    }

    /// Apply `MONITOR_*` environment overrides on top of the file values
    pub fn apply_env_overrides(&mut self) {
        if let Some(db_path) = util::get_db_path() {
            let table = match &self.storage {
                StorageConfig::Sqlite { table, .. } => table.clone(),
                StorageConfig::Memory => default_table(),
            };
            self.storage = StorageConfig::Sqlite {
                path: PathBuf::from(db_path),
                table,
            };
        }

        if let Some(table_name) = util::get_db_table() {
            if let StorageConfig::Sqlite { table, .. } = &mut self.storage {
                *table = table_name;
            }
        }

        if let Some(max_in_flight) = util::get_max_in_flight() {
            self.fleet.max_in_flight = max_in_flight;
        }

        if let Some(fallback) = util::get_fallback_path() {
            self.sink.fallback_path = PathBuf::from(fallback);
        }
    }
}

impl FleetConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl SinkConfig {
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_secs)
    }
}

pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file {}", path.display()))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

/// Load the config file if present, otherwise start from defaults; then apply the
/// environment and validate
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let mut config = if path.exists() {
        read_config_file(path)?
    } else {
        info!(
            "config file {} not found, using defaults and environment variables",
            path.display()
        );
        Config::default()
    };

    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}
