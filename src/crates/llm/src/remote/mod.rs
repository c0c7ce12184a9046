//! Remote provider implementations.
//!
//! - **OpenAI-compatible** - any endpoint exposing `/chat/completions`
//! - **Gemini** - Google's `generateContent` API

pub mod gemini;
pub mod openai;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

use crate::config::ProviderConfig;
use crate::error::{LlmError, Result};
use reqwest::Client;

/// Build the shared HTTP client for a provider.
pub(crate) fn http_client(config: &ProviderConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| LlmError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Turn a non-success response into an [`LlmError::Api`].
pub(crate) async fn error_from_response(response: reqwest::Response) -> LlmError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body).unwrap_or(body);
    LlmError::api(status, message)
}

/// Pull `error.message` out of a JSON error body, if present.
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.get("message").or(Some(e)))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}
