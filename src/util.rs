use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

const DB_PATH: &str = "MONITOR_DB_PATH";

pub fn get_db_path() -> Option<String> {
    std::env::var(DB_PATH).ok().filter(|v| !v.is_empty())
}

const DB_TABLE: &str = "MONITOR_DB_TABLE";

pub fn get_db_table() -> Option<String> {
    std::env::var(DB_TABLE).ok().filter(|v| !v.is_empty())
}

const MAX_IN_FLIGHT: &str = "MONITOR_MAX_IN_FLIGHT";

pub fn get_max_in_flight() -> Option<usize> {
    std::env::var(MAX_IN_FLIGHT).ok().and_then(|v| v.parse().ok())
}

const FALLBACK_PATH: &str = "MONITOR_FALLBACK_PATH";

pub fn get_fallback_path() -> Option<String> {
    std::env::var(FALLBACK_PATH).ok().filter(|v| !v.is_empty())
}

/// Exponential backoff capped at `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial.min(max),
            max,
        }
    }

    /// The delay to wait now; doubles the next one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

/// Stable offset in `[0, spread)` derived from `key`
///
/// Spreads first fires of many targets without a random source, and gives the same
/// offset to the same URL across restarts.
pub fn stable_jitter(key: &str, spread: Duration) -> Duration {
    let spread_ms = spread.as_millis() as u64;
    if spread_ms == 0 {
        return Duration::ZERO;
    }

    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    Duration::from_millis(hasher.finish() % spread_ms)
}
