//! Error types for provider calls.

use thiserror::Error;

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// How a failed attempt should be routed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Provider-wide overload ("over capacity", 503/529). Skip the model.
    Capacity,
    /// Per-credential rate limit (429). Cool the credential down.
    RateLimit,
    /// Per-credential quota exhausted for the day.
    Quota,
    /// Client error other than 429. Not retryable.
    BadRequest,
    /// Deadline elapsed before the provider answered.
    Timeout,
    /// Other server or network failure. Retry with another credential.
    Transient,
    /// Anything else (malformed payload, configuration).
    Other,
}

impl ProviderErrorKind {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderErrorKind::BadRequest | ProviderErrorKind::Other)
    }
}

/// Errors that can occur when calling a provider.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport failure before an HTTP status was received.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status returned by the provider.
    #[error("Provider returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body did not match the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Failed to serialize/deserialize data.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Request timeout.
    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// Build an API error, redacting anything credential-shaped from the body.
    pub fn api(status: u16, message: impl AsRef<str>) -> Self {
        LlmError::Api {
            status,
            message: tooling::logging::redact_provider_message(message.as_ref()),
        }
    }

    /// HTTP-like status for the `{status, message}` error shape.
    ///
    /// Transport failures report `0`, timeouts `408`, malformed payloads `502`.
    pub fn status(&self) -> u16 {
        match self {
            LlmError::Api { status, .. } => *status,
            LlmError::Http(e) => e.status().map(|s| s.as_u16()).unwrap_or(0),
            LlmError::Timeout(_) => 408,
            LlmError::InvalidResponse(_) | LlmError::Serialization(_) => 502,
            LlmError::Config(_) => 0,
        }
    }

    /// Classify the failure for routing.
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            LlmError::Api { status, message } => classify_status(*status, message),
            LlmError::Http(e) if e.is_timeout() => ProviderErrorKind::Timeout,
            LlmError::Http(e) => match e.status() {
                Some(status) => classify_status(status.as_u16(), &e.to_string()),
                None => ProviderErrorKind::Transient,
            },
            LlmError::Timeout(_) => ProviderErrorKind::Timeout,
            LlmError::InvalidResponse(_) | LlmError::Serialization(_) => ProviderErrorKind::Transient,
            LlmError::Config(_) => ProviderErrorKind::Other,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Classify a status code and message body.
///
/// Quota exhaustion is reported by providers as a 429 (or 403 on some
/// gateways) whose body mentions a quota or a daily limit; plain 429s are
/// rate limits.
pub fn classify_status(status: u16, message: &str) -> ProviderErrorKind {
    let lower = message.to_lowercase();
    let mentions_quota = lower.contains("quota")
        || lower.contains("per day")
        || lower.contains("daily limit")
        || lower.contains("billing");

    match status {
        429 if mentions_quota => ProviderErrorKind::Quota,
        429 => ProviderErrorKind::RateLimit,
        403 if mentions_quota => ProviderErrorKind::Quota,
        408 => ProviderErrorKind::Timeout,
        503 | 529 => ProviderErrorKind::Capacity,
        500..=599 if lower.contains("capacity") || lower.contains("overloaded") => {
            ProviderErrorKind::Capacity
        }
        500..=599 => ProviderErrorKind::Transient,
        400..=499 => ProviderErrorKind::BadRequest,
        _ => ProviderErrorKind::Other,
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Serialization(err.to_string())
    }
}
