//! OpenAI-compatible provider.
//!
//! Speaks the `/chat/completions` protocol, so it also serves gateways and
//! self-hosted servers that mirror it.

use crate::config::ProviderConfig;
use crate::error::{LlmError, Result};
use crate::provider::Provider;
use crate::remote::{error_from_response, http_client};
use crate::types::{ChatMessage, GenerateRequest, GenerateResponse, ResponseFormat, Usage};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// OpenAI-compatible API client.
#[derive(Clone)]
pub struct OpenAiProvider {
    name: String,
    config: ProviderConfig,
    client: Client,
}

impl OpenAiProvider {
    /// Create a new provider serving the named pool.
    pub fn new(name: impl Into<String>, config: ProviderConfig) -> Result<Self> {
        let client = http_client(&config)?;
        Ok(Self {
            name: name.into(),
            config,
            client,
        })
    }

    fn convert_message(msg: &ChatMessage) -> OpenAiMessage {
        OpenAiMessage {
            role: msg.role.as_str().to_string(),
            content: Some(msg.content.clone()),
        }
    }

    fn build_body(request: &GenerateRequest) -> OpenAiRequest {
        OpenAiRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(Self::convert_message).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: match request.response_format {
                Some(ResponseFormat::JsonObject) => Some(OpenAiResponseFormat {
                    kind: "json_object".to_string(),
                }),
                _ => None,
            },
            stream: false,
        }
    }

    fn convert_response(raw: serde_json::Value) -> Result<GenerateResponse> {
        let parsed: OpenAiResponse = serde_json::from_value(raw.clone())?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

        Ok(GenerateResponse {
            text: choice.message.content.unwrap_or_default(),
            usage: parsed
                .usage
                .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens)),
            raw,
        })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, api_key: &str, request: GenerateRequest) -> Result<GenerateResponse> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = Self::build_body(&request);

        let mut req = self.client.post(&url).bearer_auth(api_key).json(&body);
        if let Some(org) = &self.config.organization {
            req = req.header("OpenAI-Organization", org);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(self.config.timeout.as_millis() as u64)
            } else {
                LlmError::Http(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        debug!(provider = %self.name, model = %request.model, "completion received");
        Self::convert_response(raw)
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAiResponseFormat>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_creation() {
        let provider = OpenAiProvider::new("primary", ProviderConfig::new("https://api.openai.com/v1"));
        assert_eq!(provider.unwrap().name(), "primary");
    }

    #[test]
    fn test_body_json_mode() {
        let request = GenerateRequest::new(
            "gpt-4o-mini",
            vec![ChatMessage::system("plan"), ChatMessage::user("hi")],
        )
        .with_temperature(0.1)
        .with_response_format(ResponseFormat::JsonObject);

        let body = serde_json::to_value(OpenAiProvider::build_body(&request)).unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_response_conversion() {
        let raw = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi there!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30}
        });

        let response = OpenAiProvider::convert_response(raw).unwrap();
        assert_eq!(response.text, "Hi there!");
        assert_eq!(response.usage.unwrap().total(), 30);
    }

    #[test]
    fn test_response_without_choices() {
        let raw = json!({"choices": [], "usage": null});
        assert!(matches!(
            OpenAiProvider::convert_response(raw),
            Err(LlmError::InvalidResponse(_))
        ));
    }
}
