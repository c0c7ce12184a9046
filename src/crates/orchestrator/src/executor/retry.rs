//! Retry policy for tool tasks
//!
//! Tool backends fail in the usual network ways. Transient failures
//! (timeouts, resets, 5xx, rate limits) are retried with exponential
//! backoff; anything else fails the task on the first attempt. Generation
//! tasks never go through here: the invoker does its own credential and
//! model rotation.

use crate::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Classification of errors for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// May succeed on retry (rate limits, timeouts, 5xx, connection trouble)
    Transient,

    /// Will not succeed on retry (bad parameters, auth, not found)
    Permanent,

    Unknown,
}

/// Retry strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    pub initial_backoff_ms: u64,

    pub max_backoff_ms: u64,

    pub backoff_multiplier: f64,

    /// Add up to 25% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(0)
    }

    pub fn with_initial_backoff(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    pub fn with_max_backoff(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt + 1`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32)) as u64;
        let delay_ms = delay_ms.min(self.max_backoff_ms);

        let delay_ms = if self.jitter {
            delay_ms + (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms)
    }
}

const TRANSIENT_MARKERS: &[&str] = &[
    "rate limit",
    "too many requests",
    "429",
    "timeout",
    "timed out",
    "deadline exceeded",
    "500",
    "502",
    "503",
    "504",
    "service unavailable",
    "bad gateway",
    "connection",
    "network",
    "dns",
    "temporarily",
];

const PERMANENT_MARKERS: &[&str] = &[
    "invalid request",
    "bad request",
    "400",
    "401",
    "unauthorized",
    "403",
    "forbidden",
    "404",
    "not found",
];

/// Classify an error by its message
pub fn classify_error(error: &OrchestratorError) -> ErrorClass {
    let msg = match error {
        OrchestratorError::Tool(msg)
        | OrchestratorError::Retrieval(msg)
        | OrchestratorError::General(msg) => msg.to_lowercase(),
        OrchestratorError::Io(_) => return ErrorClass::Transient,
        OrchestratorError::Serialization(_) | OrchestratorError::Config(_) => {
            return ErrorClass::Permanent
        }
        _ => return ErrorClass::Unknown,
    };

    // Permanent markers win: "invalid request ... timeout" is still a bad request
    if PERMANENT_MARKERS.iter().any(|m| msg.contains(m)) {
        return ErrorClass::Permanent;
    }
    if TRANSIENT_MARKERS.iter().any(|m| msg.contains(m)) {
        return ErrorClass::Transient;
    }
    ErrorClass::Unknown
}

/// Run `f`, retrying transient failures with backoff
pub async fn retry_with_backoff<F, Fut, T>(config: &RetryConfig, operation_name: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                let class = classify_error(&e);
                if class != ErrorClass::Transient || attempt >= config.max_retries {
                    debug!(
                        operation = operation_name,
                        attempt,
                        classification = ?class,
                        error = %e,
                        "Giving up"
                    );
                    return Err(e);
                }

                let delay = config.backoff_delay(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
