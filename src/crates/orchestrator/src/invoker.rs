//! Single call site for generation models.
//!
//! For each model in a role's fallback chain the invoker makes up to K
//! attempts, K being the size of the model's provider pool. Credential-level
//! retries (same model, new key) stay in the inner loop; model-level fallback
//! (capacity, budget, no healthy key, open circuit) breaks out to the next
//! model.

use crate::context::estimate_usage;
use crate::governance::{ModelGovernance, ModelRole};
use crate::keys::KeyManager;
use crate::resilience::{BudgetTracker, CircuitRegistry};
use async_trait::async_trait;
use llm::{ChatMessage, GenerateRequest, LlmError, Provider, ProviderErrorKind, ResponseFormat};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tooling::logging::elapsed_ms;
use tooling::{with_timeout, TimeoutError};
use tracing::{debug, info, warn};

/// Failure classification surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    None,
    Capacity,
    RateLimit,
    Quota,
    BadRequest,
    Other,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::None => "none",
            ErrorCode::Capacity => "capacity",
            ErrorCode::RateLimit => "rate_limit",
            ErrorCode::Quota => "quota",
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::Other => "other",
        };
        f.write_str(s)
    }
}

/// Result of one invocation across the whole fallback chain
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub ok: bool,
    pub text: String,
    pub model_used: Option<String>,
    pub error_code: ErrorCode,
    pub retryable: bool,
    /// Tokens charged to the budget (reported or estimated)
    pub tokens: u64,
    /// Last error, already redacted
    pub error: Option<String>,
}

impl GenerationOutcome {
    pub fn success(text: impl Into<String>, model: &str, tokens: u64) -> Self {
        Self {
            ok: true,
            text: text.into(),
            model_used: Some(model.to_string()),
            error_code: ErrorCode::None,
            retryable: false,
            tokens,
            error: None,
        }
    }

    pub fn failure(code: ErrorCode, retryable: bool, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            text: String::new(),
            model_used: None,
            error_code: code,
            retryable,
            tokens: 0,
            error: Some(error.into()),
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub json_mode: bool,
    /// Overrides the role timeout
    pub timeout: Option<Duration>,
}

impl InvokeOptions {
    pub fn json() -> Self {
        Self {
            json_mode: true,
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Role-dependent attempt deadlines
#[derive(Debug, Clone)]
pub struct RoleTimeouts {
    pub classifier: Duration,
    pub orchestrator: Duration,
    pub generation: Duration,
    pub overrides: HashMap<ModelRole, Duration>,
}

impl RoleTimeouts {
    pub fn for_role(&self, role: ModelRole) -> Duration {
        if let Some(timeout) = self.overrides.get(&role) {
            return *timeout;
        }
        match role {
            ModelRole::Classifier => self.classifier,
            ModelRole::Orchestrator => self.orchestrator,
            _ => self.generation,
        }
    }
}

impl Default for RoleTimeouts {
    fn default() -> Self {
        Self {
            classifier: Duration::from_secs(5),
            orchestrator: Duration::from_secs(15),
            generation: Duration::from_secs(30),
            overrides: HashMap::new(),
        }
    }
}

/// Anything that can produce text for a role
///
/// Implemented by [`ModelInvoker`]; the DAG executor and planner only see
/// this seam.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        role: ModelRole,
        messages: Vec<ChatMessage>,
        intent: &str,
        options: InvokeOptions,
    ) -> GenerationOutcome;
}

/// The provider invoker
pub struct ModelInvoker {
    governance: Arc<ModelGovernance>,
    keys: Arc<KeyManager>,
    circuits: Arc<CircuitRegistry>,
    budget: Arc<BudgetTracker>,
    providers: HashMap<String, Arc<dyn Provider>>,
    timeouts: RoleTimeouts,
}

/// What the inner loop decided after one attempt
enum AttemptVerdict {
    NextCredential,
    NextModel,
    Abort,
}

impl ModelInvoker {
    pub fn new(
        governance: Arc<ModelGovernance>,
        keys: Arc<KeyManager>,
        circuits: Arc<CircuitRegistry>,
        budget: Arc<BudgetTracker>,
    ) -> Self {
        Self {
            governance,
            keys,
            circuits,
            budget,
            providers: HashMap::new(),
            timeouts: RoleTimeouts::default(),
        }
    }

    /// Register a provider under its pool name
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }

    pub fn with_timeouts(mut self, timeouts: RoleTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn governance(&self) -> &Arc<ModelGovernance> {
        &self.governance
    }

    /// Invoke a role with a single user prompt and optional system text
    pub async fn invoke(
        &self,
        role: ModelRole,
        system: Option<&str>,
        prompt: &str,
        intent: &str,
        options: InvokeOptions,
    ) -> GenerationOutcome {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));
        self.invoke_messages(role, messages, intent, options).await
    }

    /// Invoke a role with a full message list
    pub async fn invoke_messages(
        &self,
        role: ModelRole,
        messages: Vec<ChatMessage>,
        intent: &str,
        options: InvokeOptions,
    ) -> GenerationOutcome {
        let models = self.governance.models_for(role);
        if models.is_empty() {
            warn!(role = %role, "No models configured for role");
            return GenerationOutcome::failure(
                ErrorCode::Other,
                false,
                format!("no models configured for role {}", role),
            );
        }

        let timeout = options
            .timeout
            .unwrap_or_else(|| self.timeouts.for_role(role));
        let mut last = GenerationOutcome::failure(ErrorCode::Other, true, "no attempt made");

        for model in &models {
            let Some(provider_name) = self.governance.provider_for(model) else {
                warn!(model = %model, "Model has no provider route");
                last = GenerationOutcome::failure(ErrorCode::Other, false, format!("no provider for {}", model));
                continue;
            };
            let Some(provider) = self.providers.get(&provider_name) else {
                warn!(model = %model, provider = %provider_name, "Provider not registered");
                last = GenerationOutcome::failure(
                    ErrorCode::Other,
                    false,
                    format!("provider {} not registered", provider_name),
                );
                continue;
            };

            let breaker = self.circuits.get(&provider_name);
            let attempts = self.keys.pool_size(&provider_name);

            for attempt in 1..=attempts {
                let budget = self.budget.check(model);
                if !budget.ok {
                    info!(model = %model, reason = ?budget.reason, "Model over daily budget, skipping");
                    last = GenerationOutcome::failure(
                        ErrorCode::Quota,
                        false,
                        budget.reason.unwrap_or_else(|| format!("budget exhausted for {}", model)),
                    );
                    break;
                }
                let Some(permit) = breaker.admit() else {
                    info!(model = %model, provider = %provider_name, "Circuit open, skipping model");
                    last = GenerationOutcome::failure(
                        ErrorCode::Other,
                        true,
                        format!("circuit open for {}", provider_name),
                    );
                    break;
                };
                // An unused permit releases its probe slot when dropped
                let Some(lease) = self.keys.acquire(&provider_name, model) else {
                    last = GenerationOutcome::failure(
                        ErrorCode::RateLimit,
                        true,
                        format!("no healthy credential for {}", provider_name),
                    );
                    break;
                };

                let mut request = GenerateRequest::new(model.clone(), messages.clone());
                if let Some(t) = options.temperature {
                    request = request.with_temperature(t);
                }
                if let Some(max) = options.max_tokens {
                    request = request.with_max_tokens(max);
                }
                if options.json_mode {
                    request = request.with_response_format(ResponseFormat::JsonObject);
                }

                let started = Instant::now();
                let result = with_timeout(timeout, provider.generate(lease.secret(), request)).await;
                let elapsed = elapsed_ms(started);

                let error = match result {
                    Ok(response) => {
                        let tokens = response
                            .usage
                            .map(|u| u.total())
                            .unwrap_or_else(|| estimate_usage(&messages, &response.text))
                            as u64;
                        self.budget.record(model, tokens);
                        self.keys.report_success(&lease.id, model);
                        permit.success();
                        info!(
                            role = %role,
                            intent = intent,
                            model = %model,
                            credential = %lease.masked,
                            status = 200,
                            attempt = attempt,
                            elapsed_ms = elapsed,
                            tokens = tokens,
                            "Provider attempt succeeded"
                        );
                        return GenerationOutcome::success(response.text, model, tokens);
                    }
                    Err(TimeoutError::Timeout(after)) => LlmError::Timeout(after.as_millis() as u64),
                    Err(TimeoutError::OperationFailed(e)) => e,
                };

                let kind = error.kind();
                warn!(
                    role = %role,
                    model = %model,
                    credential = %lease.masked,
                    status = error.status(),
                    kind = ?kind,
                    attempt = attempt,
                    elapsed_ms = elapsed,
                    error = %error,
                    "Provider attempt failed"
                );

                let (code, verdict) = match kind {
                    ProviderErrorKind::RateLimit => {
                        self.keys.report_rate_limit(&lease.id, model);
                        (ErrorCode::RateLimit, AttemptVerdict::NextCredential)
                    }
                    ProviderErrorKind::Quota => {
                        self.keys.report_quota(&lease.id, model);
                        (ErrorCode::Quota, AttemptVerdict::NextCredential)
                    }
                    ProviderErrorKind::Capacity => {
                        self.keys.report_error(&lease.id, model, kind);
                        permit.failure();
                        (ErrorCode::Capacity, AttemptVerdict::NextModel)
                    }
                    ProviderErrorKind::Transient => {
                        self.keys.report_error(&lease.id, model, kind);
                        permit.failure();
                        (ErrorCode::Other, AttemptVerdict::NextCredential)
                    }
                    ProviderErrorKind::Timeout => {
                        self.keys.report_error(&lease.id, model, kind);
                        permit.neutral();
                        (ErrorCode::Other, AttemptVerdict::NextCredential)
                    }
                    ProviderErrorKind::BadRequest => {
                        self.keys.report_error(&lease.id, model, kind);
                        permit.neutral();
                        (ErrorCode::BadRequest, AttemptVerdict::Abort)
                    }
                    ProviderErrorKind::Other => {
                        self.keys.report_error(&lease.id, model, kind);
                        permit.neutral();
                        (ErrorCode::Other, AttemptVerdict::NextModel)
                    }
                };

                let mut outcome = GenerationOutcome::failure(code, kind.is_retryable(), error.to_string());
                outcome.model_used = Some(model.clone());
                last = outcome;

                match verdict {
                    AttemptVerdict::NextCredential => continue,
                    AttemptVerdict::NextModel => break,
                    AttemptVerdict::Abort => return last,
                }
            }

            debug!(role = %role, model = %model, "Falling back to next model");
        }

        warn!(
            role = %role,
            error_code = %last.error_code,
            error = ?last.error,
            "All models failed for role"
        );
        last
    }
}

#[async_trait]
impl Generator for ModelInvoker {
    async fn generate(
        &self,
        role: ModelRole,
        messages: Vec<ChatMessage>,
        intent: &str,
        options: InvokeOptions,
    ) -> GenerationOutcome {
        self.invoke_messages(role, messages, intent, options).await
    }
}

impl fmt::Debug for ModelInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut providers: Vec<&String> = self.providers.keys().collect();
        providers.sort();
        f.debug_struct("ModelInvoker")
            .field("providers", &providers)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}
