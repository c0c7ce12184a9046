//! Provider connection settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings for a remote provider.
///
/// Credentials live in the key manager and are passed per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL for the API.
    ///
    /// Examples:
    /// - OpenAI: "https://api.openai.com/v1"
    /// - Gemini: "https://generativelanguage.googleapis.com/v1beta"
    pub base_url: String,

    /// Transport-level timeout. The orchestrator applies a tighter
    /// per-role deadline on top of this.
    #[serde(default = "default_timeout")]
    pub timeout: Duration,

    /// Organization ID (optional, OpenAI only).
    #[serde(default)]
    pub organization: Option<String>,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: default_timeout(),
            organization: None,
        }
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the organization ID.
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}
