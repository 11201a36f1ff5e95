pub mod actors;
pub mod config;
pub mod probe;
pub mod registry;
pub mod storage;
pub mod util;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a probe did not count as a clean success
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request did not complete within the probe timeout
    Timeout,

    /// DNS resolution failed, the connection was refused or reset
    ConnectionFailed,

    /// TLS handshake or certificate validation failed
    TlsError,

    /// A response arrived with a status outside the configured expectation
    UnexpectedStatus,

    /// The body was received but did not contain the pattern
    PatternNotFound,

    /// A pattern is configured but could not be evaluated against the body
    PatternEvaluationFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionFailed => "connection_failed",
            ErrorKind::TlsError => "tls_error",
            ErrorKind::UnexpectedStatus => "unexpected_status",
            ErrorKind::PatternNotFound => "pattern_not_found",
            ErrorKind::PatternEvaluationFailed => "pattern_evaluation_failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "timeout" => Ok(ErrorKind::Timeout),
            "connection_failed" => Ok(ErrorKind::ConnectionFailed),
            "tls_error" => Ok(ErrorKind::TlsError),
            "unexpected_status" => Ok(ErrorKind::UnexpectedStatus),
            "pattern_not_found" => Ok(ErrorKind::PatternNotFound),
            "pattern_evaluation_failed" => Ok(ErrorKind::PatternEvaluationFailed),
            other => Err(format!("unknown error kind '{other}'")),
        }
    }
}

/// The record produced by exactly one probe of one target
///
/// Built once by the probe, handed to the result sink, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// URL of the target that was probed
    pub target_url: String,

    /// When the request was issued
    pub checked_at: DateTime<Utc>,

    /// Wall time until the last body byte; `None` if the request never completed
    pub response_time_ms: Option<u64>,

    /// HTTP status, `None` if no response arrived
    pub status_code: Option<u16>,

    /// `None` when no pattern is configured or the body was unavailable
    pub pattern_matched: Option<bool>,

    pub error_kind: Option<ErrorKind>,

    /// Only set together with `error_kind`
    pub error_detail: Option<String>,

    /// Leading slice of the page body, only when content capture is enabled
    pub body_excerpt: Option<String>,
}

impl CheckOutcome {
    /// An outcome with nothing measured yet
    pub fn new(target_url: impl Into<String>, checked_at: DateTime<Utc>) -> Self {
        Self {
            target_url: target_url.into(),
            checked_at,
            response_time_ms: None,
            status_code: None,
            pattern_matched: None,
            error_kind: None,
            error_detail: None,
            body_excerpt: None,
        }
    }

    /// Attach an error; the first error recorded wins
    pub fn with_error(mut self, kind: ErrorKind, detail: impl Into<String>) -> Self {
        if self.error_kind.is_none() {
            self.error_kind = Some(kind);
            self.error_detail = Some(detail.into());
        }
        self
    }

    pub fn is_failure(&self) -> bool {
        self.error_kind.is_some()
    }
}
