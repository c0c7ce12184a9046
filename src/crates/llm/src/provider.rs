//! The provider capability.

use crate::error::Result;
use crate::types::{GenerateRequest, GenerateResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Wire protocol spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible `/chat/completions`
    Openai,
    /// Google Gemini `generateContent`
    Gemini,
}

/// A model provider.
///
/// Implementations must be stateless with respect to credentials: the key
/// to use is passed on every call so that the caller can rotate keys per
/// attempt.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Pool name this provider serves (e.g. `primary`, `secondary`).
    fn name(&self) -> &str;

    /// Generate a completion with the given credential.
    async fn generate(&self, api_key: &str, request: GenerateRequest) -> Result<GenerateResponse>;
}
