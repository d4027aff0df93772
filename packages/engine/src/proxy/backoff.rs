// packages/engine/src/proxy/backoff.rs
//! Exponential backoff for proxied requests
//!
//! Retry `n` (0-based) waits `base * 2^n`. Once that delay would exceed the
//! ceiling the last fault is raised instead of slept on, so the sequence is
//! always finite: `B, 2B, 4B, ...` up to `max_wait`.
//!
//! Each attempt runs under its own timeout; a timed-out attempt is a
//! transient fault like a dropped connection.

use crate::utils::config::ProxyConfig;
use crate::utils::errors::{EngineError, Result};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Outcome of one failed request attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestFault {
    /// Connection reset, proxy refused, truncated payload: worth retrying
    #[error("Transient request fault: {0}")]
    Transient(String),

    /// Unexpected content or a non-retryable status
    #[error("Request fault: {0}")]
    Fatal(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl RequestFault {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Delay law and ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base: Duration,

    /// Largest delay that will still be slept on
    pub max_wait: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max_wait: Duration) -> Self {
        Self { base, max_wait }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(config.retry_base(), config.max_wait())
    }

    /// Delay before retry `retry`, or `None` once it passes the ceiling
    pub fn delay_for(&self, retry: u32) -> Option<Duration> {
        let factor = 2u32.checked_pow(retry)?;
        let delay = self.base.checked_mul(factor)?;
        (delay <= self.max_wait).then_some(delay)
    }

    /// Number of retries the policy allows before giving up
    pub fn max_retries(&self) -> u32 {
        let mut retries = 0;
        while self.delay_for(retries).is_some() {
            retries += 1;
        }
        retries
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&ProxyConfig::default())
    }
}

/// Run `attempt` until it succeeds, fails fatally, or the policy gives up.
///
/// `attempt` receives the 0-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &BackoffPolicy,
    request_timeout: Duration,
    label: &str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, RequestFault>>,
{
    let mut retry = 0u32;

    loop {
        let outcome = match tokio::time::timeout(request_timeout, attempt(retry)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RequestFault::Timeout(request_timeout)),
        };

        let fault = match outcome {
            Ok(value) => {
                if retry > 0 {
                    debug!("Request via {} succeeded after {} retries", label, retry);
                }
                return Ok(value);
            }
            Err(fault) => fault,
        };

        if !fault.is_transient() {
            debug!("Request via {} failed without retry: {}", label, fault);
            return Err(EngineError::RequestFailed(fault.to_string()));
        }

        match policy.delay_for(retry) {
            Some(delay) => {
                warn!(
                    "Request via {} failed ({}); retry {} in {:?}",
                    label,
                    fault,
                    retry + 1,
                    delay
                );
                metrics::counter!("weaver_proxy_retries_total").increment(1);
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            None => {
                error!(
                    "Request via {} gave up after {} attempts: {}",
                    label,
                    retry + 1,
                    fault
                );
                return Err(EngineError::RetryCeilingExceeded {
                    attempts: retry + 1,
                    last_error: fault.to_string(),
                });
            }
        }
    }
}
