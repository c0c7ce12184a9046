//! Request orchestration core
//!
//! Turns a user utterance into a bounded, partially-parallel plan of work over
//! model providers and tools, executes it under failure, budget and rate-limit
//! discipline, and splices the results into a single reply.
//!
//! # Layout
//!
//! - [`keys`] - credential pools, least-loaded selection and health states
//! - [`resilience`] - per-service circuit breakers and per-model daily budgets
//! - [`governance`] - role to ordered model list (the fallback chain)
//! - [`invoker`] - the single call site for providers
//! - [`intent`] and [`planner`] - fast intent signals and plan construction
//! - [`executor`] - layered DAG execution with dependency injection
//! - [`rag`] - retrieval gate deciding whether document evidence is attached
//! - [`gateway`] - per-request assembly, streaming and persistence
//!
//! Process-wide state (keys, circuits, budgets) is created once by
//! [`runtime::Runtime`] at startup and shared through `Arc`s.

pub mod clock;
pub mod config;
pub mod context;
pub mod executor;
pub mod gateway;
pub mod governance;
pub mod intent;
pub mod invoker;
pub mod keys;
pub mod planner;
pub mod rag;
pub mod resilience;
pub mod runtime;
pub mod tools;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::OrchestratorSettings;
pub use executor::{DagExecutor, TaskResult, TaskStatus};
pub use gateway::{Gateway, GatewayReply, GatewayRequest, StreamEvent};
pub use governance::{ModelGovernance, ModelRole};
pub use invoker::{ErrorCode, GenerationOutcome, InvokeOptions, ModelInvoker};
pub use keys::{CredentialState, KeyManager};
pub use planner::{OrchestrationPlan, PlanBuilder, Task, TaskType};
pub use rag::{GateDecision, GatingResult, RagGate};
pub use runtime::Runtime;

use thiserror::Error;

/// Errors that can occur during orchestration
///
/// Subsystems report structured outcomes; these errors only cross the
/// gateway boundary or come out of configuration and wiring.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The terminal task of a plan failed
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// The caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,

    /// The plan builder refused the intent; the caller should use its legacy path
    #[error("Legacy fallback required for intent '{0}'")]
    LegacyFallbackRequired(String),

    /// A tool invocation failed
    #[error("Tool error: {0}")]
    Tool(String),

    /// Conversation store failure
    #[error("Conversation store error: {0}")]
    Store(String),

    /// Document index failure
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// General error
    #[error("Orchestrator error: {0}")]
    General(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Message safe to show to an end user.
    ///
    /// Never includes provider payloads, credential material or internal
    /// error text.
    pub fn user_message(&self) -> &'static str {
        match self {
            OrchestratorError::Cancelled => "The request was cancelled.",
            OrchestratorError::LegacyFallbackRequired(_) => {
                "This request needs to be handled by a different assistant mode."
            }
            OrchestratorError::GenerationFailed(_) => {
                "Sorry, I couldn't generate a reply right now. Please try again in a moment."
            }
            _ => "Something went wrong while processing your request. Please try again.",
        }
    }

    /// HTTP-like status for the outer surface
    pub fn status_code(&self) -> u16 {
        match self {
            OrchestratorError::Cancelled => 499,
            OrchestratorError::LegacyFallbackRequired(_) => 409,
            OrchestratorError::GenerationFailed(_) => 503,
            _ => 500,
        }
    }
}

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
