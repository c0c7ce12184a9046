//! Shared helpers for the orchestration workspace
//!
//! # Modules
//!
//! - `async_utils` - Timeout wrappers for provider and retrieval calls
//! - `config` - Environment variable loading with proper error handling
//! - `logging` - Secret masking and duration formatting for structured logs
//! - `serialization` - Stable hashing of queries and messages

pub mod async_utils;
pub mod config;
pub mod logging;
pub mod serialization;

pub use async_utils::timeout::{with_timeout, TimeoutError};
pub use logging::mask_secret;
pub use serialization::{normalize_text, sha256_hex};

use thiserror::Error;

/// Errors that can occur in the tooling crate
#[derive(Debug, Error)]
pub enum ToolingError {
    /// General error with message
    #[error("Tooling error: {0}")]
    General(String),

    /// Environment variable present but unusable
    #[error("Invalid environment variable {key}: {reason}")]
    InvalidEnv { key: String, reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for tooling operations
pub type Result<T> = std::result::Result<T, ToolingError>;

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
