//! Probe executor - one HTTP GET per call, always turned into a `CheckOutcome`
//!
//! ## Outcome rules
//!
//! - Network failures become `timeout`, `tls_error` or `connection_failed` and leave
//!   `status_code` empty
//! - Any received status is recorded; it is only an error when `expected_status` is
//!   configured and does not contain it
//! - With a pattern configured, the body (up to `max_body_bytes`, decoded lossily) is
//!   searched and `pattern_matched` set; a miss is `pattern_not_found`
//! - When several problems apply the first one wins: network, then status, then pattern

use std::error::Error as _;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument, trace};

use crate::config::ProbeConfig;
use crate::registry::MonitoredTarget;
use crate::{CheckOutcome, ErrorKind};

/// Anything that can check a target
///
/// Implementations must never panic on remote misbehaviour and never fail outward:
/// every problem ends up inside the returned outcome.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn execute(&self, target: &MonitoredTarget) -> CheckOutcome;
}

/// Production probe backed by a shared `reqwest` client
pub struct HttpProbe {
    client: reqwest::Client,
    config: ProbeConfig,
}

impl HttpProbe {
    pub fn new(config: ProbeConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client, config })
    }

    /// Request timeout for `target`: the configured ceiling, but always strictly
    /// below the target's interval
    pub fn timeout_for(&self, target: &MonitoredTarget) -> Duration {
        let interval = target.interval();
        let ceiling = Duration::from_millis(self.config.timeout_ceiling_ms);
        let below_interval = interval
            .checked_sub(Duration::from_millis(self.config.timeout_margin_ms))
            .filter(|d| !d.is_zero())
            .unwrap_or(interval / 2)
            .min(interval - Duration::from_millis(1));

        ceiling.min(below_interval)
    }

    /// Read the body chunk by chunk, stopping at `max_body_bytes`
    async fn read_body(&self, mut response: reqwest::Response) -> reqwest::Result<Vec<u8>> {
        let limit = self.config.max_body_bytes;
        let mut body = Vec::new();

        while let Some(chunk) = response.chunk().await? {
            let room = limit.saturating_sub(body.len());
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                debug!("body truncated at {limit} bytes");
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }

    fn evaluate_body(
        &self,
        target: &MonitoredTarget,
        body: &[u8],
        mut outcome: CheckOutcome,
    ) -> CheckOutcome {
        let text = String::from_utf8_lossy(body);

        if self.config.capture_body_bytes > 0 {
            let end = body.len().min(self.config.capture_body_bytes);
            outcome.body_excerpt = Some(String::from_utf8_lossy(&body[..end]).into_owned());
        }

        if let (Some(expected), Some(status)) = (&self.config.expected_status, outcome.status_code) {
            if !expected.contains(&status) {
                outcome = outcome.with_error(
                    ErrorKind::UnexpectedStatus,
                    format!("status {status} not in {expected:?}"),
                );
            }
        }

        if let Some(pattern) = target.pattern() {
            let matched = pattern.is_match(&text);
            outcome.pattern_matched = Some(matched);
            if !matched {
                outcome = outcome.with_error(
                    ErrorKind::PatternNotFound,
                    format!(
                        "pattern '{}' not found in {} bytes of body",
                        pattern.as_str(),
                        body.len()
                    ),
                );
            }
        }

        outcome
    }
}

#[async_trait]
impl Probe for HttpProbe {
    #[instrument(skip_all, fields(url = %target.url()))]
    async fn execute(&self, target: &MonitoredTarget) -> CheckOutcome {
        let timeout = self.timeout_for(target);
        let outcome = CheckOutcome::new(target.url().as_str(), Utc::now());
        let start = Instant::now();

        trace!("GET with timeout {} ms", timeout.as_millis());

        let response = match self
            .client
            .get(target.url().clone())
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let kind = classify(&e).unwrap_or(ErrorKind::ConnectionFailed);
                debug!("request failed: {kind}");
                return outcome.with_error(kind, describe(&e, timeout));
            }
        };

        let mut outcome = outcome;
        outcome.status_code = Some(response.status().as_u16());

        match self.read_body(response).await {
            Ok(body) => {
                outcome.response_time_ms = Some(start.elapsed().as_millis() as u64);
                self.evaluate_body(target, &body, outcome)
            }
            Err(e) => {
                let kind = match classify(&e) {
                    Some(kind) => kind,
                    None if target.pattern().is_some() => ErrorKind::PatternEvaluationFailed,
                    None => ErrorKind::ConnectionFailed,
                };
                debug!("body read failed: {kind}");
                outcome.with_error(kind, describe(&e, timeout))
            }
        }
    }
}

/// Map a transport error onto a network error kind; `None` if it is none of them
fn classify(error: &reqwest::Error) -> Option<ErrorKind> {
    if error.is_timeout() {
        Some(ErrorKind::Timeout)
    } else if looks_like_tls(error) {
        Some(ErrorKind::TlsError)
    } else if error.is_connect() {
        Some(ErrorKind::ConnectionFailed)
    } else {
        None
    }
}

// rustls does not surface a dedicated error type through reqwest
fn looks_like_tls(error: &reqwest::Error) -> bool {
    let mut source = error.source();
    while let Some(cause) = source {
        let message = cause.to_string().to_lowercase();
        if ["certificate", "tls", "ssl", "handshake"]
            .iter()
            .any(|needle| message.contains(needle))
        {
            return true;
        }
        source = cause.source();
    }
    false
}

fn describe(error: &reqwest::Error, timeout: Duration) -> String {
    if error.is_timeout() {
        return format!("no complete response within {} ms", timeout.as_millis());
    }

    let mut detail = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    detail
}
