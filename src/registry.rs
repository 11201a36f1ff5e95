//! Target registry - the validated, immutable set of monitored sites
//!
//! Loading never fails as a whole: every entry is validated on its own, valid ones
//! become `MonitoredTarget`s and invalid ones come back as `Rejection`s carrying the
//! raw input and the reason. Patterns are compiled here so that a bad pattern can
//! never surface at probe time.
//!
//! ## Target list format
//!
//! ```text
//! # url, interval seconds, optional pattern
//! https://example.com,30,Example Domain
//! https://status.example.org/health,10,"\"status\":\s*\"ok\""
//! https://example.net,300
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use regex::{Regex, RegexBuilder};
use url::Url;

/// Shortest allowed check interval in seconds
pub const MIN_INTERVAL_SECS: u32 = 5;

/// Longest allowed check interval in seconds
pub const MAX_INTERVAL_SECS: u32 = 300;

/// Upper bound for the compiled size of one pattern
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// One record as read from the target list, before validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTargetEntry {
    /// 1-based line in the source, 0 if the entry did not come from a file
    pub line: usize,
    pub url: String,
    pub interval: String,
    pub pattern: Option<String>,
}

impl RawTargetEntry {
    pub fn new(url: impl Into<String>, interval: impl Into<String>, pattern: Option<&str>) -> Self {
        Self {
            line: 0,
            url: url.into(),
            interval: interval.into(),
            pattern: pattern.map(str::to_string),
        }
    }
}

impl fmt::Display for RawTargetEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: {}, {}, {}",
            self.line,
            self.url,
            self.interval,
            self.pattern.as_deref().unwrap_or("<no pattern>")
        )
    }
}

/// A site to monitor; immutable for the lifetime of the process
#[derive(Debug)]
pub struct MonitoredTarget {
    url: Url,
    interval_seconds: u32,
    pattern: Option<Regex>,
}

impl MonitoredTarget {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn interval_seconds(&self) -> u32 {
        self.interval_seconds
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_seconds))
    }

    pub fn pattern(&self) -> Option<&Regex> {
        self.pattern.as_ref()
    }

    /// Validate one raw entry
    pub fn from_entry(entry: &RawTargetEntry) -> Result<Self, RejectionReason> {
        let url = parse_url(entry.url.trim())?;
        let interval_seconds = parse_interval(entry.interval.trim())?;
        // Whitespace only decides blankness; the pattern itself is compiled as written
        let pattern = entry
            .pattern
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(compile_pattern)
            .transpose()?;

        Ok(Self {
            url,
            interval_seconds,
            pattern,
        })
    }
}

/// Why an entry was left out of the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    InvalidUrl(String),
    InvalidInterval(String),
    IntervalOutOfRange(i64),
    InvalidPattern(String),
    DuplicateUrl { first_line: usize },
}

impl RejectionReason {
    /// Short machine-friendly name used in logs
    pub fn code(&self) -> &'static str {
        match self {
            RejectionReason::InvalidUrl(_) => "invalid_url",
            RejectionReason::InvalidInterval(_) => "invalid_interval",
            RejectionReason::IntervalOutOfRange(_) => "interval_out_of_range",
            RejectionReason::InvalidPattern(_) => "invalid_pattern",
            RejectionReason::DuplicateUrl { .. } => "duplicate_url",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::InvalidUrl(e) => write!(f, "invalid URL: {e}"),
            RejectionReason::InvalidInterval(e) => write!(f, "interval is not an integer: {e}"),
            RejectionReason::IntervalOutOfRange(v) => write!(
                f,
                "interval {v} outside [{MIN_INTERVAL_SECS}, {MAX_INTERVAL_SECS}] seconds"
            ),
            RejectionReason::InvalidPattern(e) => write!(f, "invalid pattern: {e}"),
            RejectionReason::DuplicateUrl { first_line } => {
                write!(f, "URL already registered by line {first_line}")
            }
        }
    }
}

/// A rejected entry together with the reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub entry: RawTargetEntry,
    pub reason: RejectionReason,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.entry, self.reason.code(), self.reason)
    }
}

/// Everything `Registry::load` produces
#[derive(Debug)]
pub struct RegistryLoad {
    pub registry: Registry,
    pub rejections: Vec<Rejection>,
}

/// Read-only set of targets, keyed by URL
#[derive(Debug, Default, Clone)]
pub struct Registry {
    targets: Vec<Arc<MonitoredTarget>>,
}

impl Registry {
    /// Validate every entry; the first occurrence of a URL wins
    pub fn load(entries: impl IntoIterator<Item = RawTargetEntry>) -> RegistryLoad {
        let mut targets = Vec::new();
        let mut rejections = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for entry in entries {
            let target = match MonitoredTarget::from_entry(&entry) {
                Ok(target) => target,
                Err(reason) => {
                    rejections.push(Rejection { entry, reason });
                    continue;
                }
            };

            if let Some(&first_line) = seen.get(target.url.as_str()) {
                rejections.push(Rejection {
                    entry,
                    reason: RejectionReason::DuplicateUrl { first_line },
                });
                continue;
            }

            seen.insert(target.url.to_string(), entry.line);
            targets.push(Arc::new(target));
        }

        RegistryLoad {
            registry: Registry { targets },
            rejections,
        }
    }

    pub fn targets(&self) -> &[Arc<MonitoredTarget>] {
        &self.targets
    }

    pub fn get(&self, url: &str) -> Option<&Arc<MonitoredTarget>> {
        self.targets.iter().find(|t| t.url.as_str() == url)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

fn parse_url(raw: &str) -> Result<Url, RejectionReason> {
    let url = Url::parse(raw).map_err(|e| RejectionReason::InvalidUrl(e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(RejectionReason::InvalidUrl(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(RejectionReason::InvalidUrl("missing host".to_string()));
    }

    Ok(url)
}

fn parse_interval(raw: &str) -> Result<u32, RejectionReason> {
    let value: i64 = raw
        .parse()
        .map_err(|e: std::num::ParseIntError| {
            RejectionReason::InvalidInterval(format!("'{raw}': {e}"))
        })?;

    if (i64::from(MIN_INTERVAL_SECS)..=i64::from(MAX_INTERVAL_SECS)).contains(&value) {
        Ok(value as u32)
    } else {
        Err(RejectionReason::IntervalOutOfRange(value))
    }
}

fn compile_pattern(raw: &str) -> Result<Regex, RejectionReason> {
    RegexBuilder::new(raw)
        .size_limit(PATTERN_SIZE_LIMIT)
        .build()
        .map_err(|e| RejectionReason::InvalidPattern(e.to_string()))
}

/// Split target-list text into raw entries
///
/// One `url,interval[,pattern]` record per line. The pattern is everything after the
/// second comma, so it may contain commas; a pattern wrapped in double quotes is
/// unquoted (`""` inside becomes `"`), any other pattern is kept with its surrounding
/// whitespace. Blank lines and lines starting with `#` are skipped.
pub fn parse_target_list(text: &str) -> Vec<RawTargetEntry> {
    text.lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                return None;
            }

            let mut fields = line.splitn(3, ',');
            let url = unquote(fields.next().unwrap_or_default().trim());
            let interval = unquote(fields.next().unwrap_or_default().trim());
            let pattern = fields
                .next()
                .filter(|p| !p.trim().is_empty())
                .map(pattern_field);

            Some(RawTargetEntry {
                line: index + 1,
                url,
                interval,
                pattern,
            })
        })
        .collect()
}

fn is_quoted(field: &str) -> bool {
    field.len() >= 2 && field.starts_with('"') && field.ends_with('"')
}

fn unquote(field: &str) -> String {
    if is_quoted(field) {
        field[1..field.len() - 1].replace("\"\"", "\"")
    } else {
        field.to_string()
    }
}

fn pattern_field(raw: &str) -> String {
    let trimmed = raw.trim();
    if is_quoted(trimmed) {
        unquote(trimmed)
    } else {
        raw.to_string()
    }
}

/// Read and split a target-list file; a missing or unreadable file is fatal
pub fn read_target_file(path: impl AsRef<Path>) -> anyhow::Result<Vec<RawTargetEntry>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read target list {}", path.display()))?;
    Ok(parse_target_list(&text))
}
