//! Model provider abstraction for the orchestration core.
//!
//! A [`Provider`] turns a [`GenerateRequest`] into a [`GenerateResponse`]
//! using a credential supplied by the caller on every call. Credential
//! selection, rotation and health live in the orchestrator's key manager;
//! providers are stateless HTTP adapters.
//!
//! # Providers
//!
//! - **OpenAI-compatible** ([`remote::OpenAiProvider`]) - the `primary` pool;
//!   any `/chat/completions` endpoint
//! - **Gemini** ([`remote::GeminiProvider`]) - the `secondary` pool
//!
//! # Errors
//!
//! Every failure is an [`LlmError`] that exposes the `{status, message}`
//! shape through [`LlmError::status`] and a routing classification through
//! [`LlmError::kind`].
//!
//! ```rust,ignore
//! use llm::{GenerateRequest, ChatMessage, Provider};
//! use llm::remote::OpenAiProvider;
//! use llm::config::ProviderConfig;
//!
//! let provider = OpenAiProvider::new("primary", ProviderConfig::new("https://api.openai.com/v1"))?;
//! let request = GenerateRequest::new("gpt-4o-mini", vec![ChatMessage::user("Hello!")])
//!     .with_temperature(0.2);
//! let response = provider.generate("sk-...", request).await?;
//! println!("{}", response.text);
//! ```

pub mod config;
pub mod error;
pub mod provider;
pub mod remote;
pub mod types;

pub use config::ProviderConfig;
pub use error::{LlmError, ProviderErrorKind, Result};
pub use provider::{Provider, ProviderKind};
pub use types::{ChatMessage, ChatRole, GenerateRequest, GenerateResponse, ResponseFormat, Usage};
