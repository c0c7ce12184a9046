//! Process-wide wiring.
//!
//! The credential pools, circuit table, budget ledger and pin store are
//! created exactly once here and shared by every request through `Arc`s.

use crate::clock::{SharedClock, SystemClock};
use crate::config::{OrchestratorSettings, ProviderSettings};
use crate::context::{ContextComposer, DEFAULT_HISTORY_TOKENS};
use crate::executor::DagExecutor;
use crate::gateway::{ConversationStore, Gateway};
use crate::governance::{ModelGovernance, ModelRole};
use crate::intent::{IntentAnalyzer, IntentCache};
use crate::invoker::{Generator, ModelInvoker};
use crate::keys::KeyManager;
use crate::planner::{PlanBuilder, SessionState};
use crate::rag::{DocumentIndex, JsonlTelemetrySink, PinStore, RagGate, TelemetrySink, TracingTelemetrySink};
use crate::resilience::{BudgetTracker, CircuitRegistry};
use crate::tools::{FluxTool, InMemoryImageQueue, MockWeatherTool, ToolRegistry};
use crate::{OrchestratorError, Result};
use llm::remote::{GeminiProvider, OpenAiProvider};
use llm::{Provider, ProviderConfig, ProviderKind};
use std::fmt;
use std::sync::Arc;
use tracing::info;

pub struct Runtime {
    pub settings: OrchestratorSettings,
    pub clock: SharedClock,
    pub keys: Arc<KeyManager>,
    pub circuits: Arc<CircuitRegistry>,
    pub budget: Arc<BudgetTracker>,
    pub governance: Arc<ModelGovernance>,
    pub invoker: Arc<ModelInvoker>,
    pub sessions: Arc<SessionState>,
    pub pins: Arc<PinStore>,
    pub telemetry: Arc<dyn TelemetrySink>,
    tools: Arc<ToolRegistry>,
    planner: Arc<PlanBuilder>,
    executor: Arc<DagExecutor>,
    gate: Option<Arc<RagGate>>,
    index: Option<Arc<dyn DocumentIndex>>,
}

impl Runtime {
    /// Build against the real HTTP providers and the system clock
    pub fn from_settings(settings: OrchestratorSettings) -> Result<Self> {
        let providers = settings
            .providers
            .iter()
            .map(build_provider)
            .collect::<Result<Vec<_>>>()?;
        Self::with_providers(settings, providers, Arc::new(SystemClock))
    }

    /// Build against caller-supplied providers; each configured provider
    /// needs one with a matching name
    pub fn with_providers(
        settings: OrchestratorSettings,
        providers: Vec<Arc<dyn Provider>>,
        clock: SharedClock,
    ) -> Result<Self> {
        settings.validate()?;
        for configured in &settings.providers {
            if !providers.iter().any(|p| p.name() == configured.name) {
                return Err(OrchestratorError::Config(format!(
                    "no provider implementation for '{}'",
                    configured.name
                )));
            }
        }

        let keys = KeyManager::new(clock.clone()).with_cooldown(settings.cooldown());
        for provider in &settings.providers {
            keys.add_pool(&provider.name, provider.keys.iter().cloned());
        }
        let keys = Arc::new(keys);

        let circuits = Arc::new(CircuitRegistry::new(settings.circuit_config(), clock.clone()));
        for provider in &settings.providers {
            circuits.register(&provider.name);
        }

        let budget = Arc::new(
            BudgetTracker::new(clock.clone())
                .with_limits(settings.budgets.models.clone())
                .with_fallback(settings.budgets.fallback),
        );

        let mut governance = ModelGovernance::new(settings.role_table());
        for (model, provider) in settings.model_routes() {
            governance = governance.with_route(model, provider);
        }
        if let Some(default) = settings.default_provider() {
            governance = governance.with_default_provider(default);
        }
        let governance = Arc::new(governance);

        let mut invoker = ModelInvoker::new(governance.clone(), keys.clone(), circuits.clone(), budget.clone())
            .with_timeouts(settings.role_timeouts());
        for provider in providers {
            invoker = invoker.with_provider(provider);
        }
        let invoker = Arc::new(invoker);

        let telemetry: Arc<dyn TelemetrySink> = match &settings.rag.telemetry_path {
            Some(path) => Arc::new(JsonlTelemetrySink::open(path)?),
            None => Arc::new(TracingTelemetrySink),
        };
        let pins = Arc::new(PinStore::new(clock.clone()).with_ttl(settings.pin_ttl()));
        let sessions = Arc::new(SessionState::new(clock.clone()));

        let tools = ToolRegistry::new()
            .with_tool(Arc::new(MockWeatherTool))
            .with_tool(Arc::new(FluxTool::new(Arc::new(InMemoryImageQueue::new()))));

        let generator: Arc<dyn Generator> = invoker.clone();
        let tools = Arc::new(tools);
        let planner = Arc::new(build_planner(&settings, generator.clone(), tools.clone(), &clock, &sessions));
        let executor = Arc::new(DagExecutor::new(generator, tools.clone()));

        info!(
            providers = settings.providers.len(),
            credentials = settings.providers.iter().map(|p| p.keys.len()).sum::<usize>(),
            roles = settings.roles.len(),
            "Runtime initialized"
        );

        Ok(Self {
            settings,
            clock,
            keys,
            circuits,
            budget,
            governance,
            invoker,
            sessions,
            pins,
            telemetry,
            tools,
            planner,
            executor,
            gate: None,
            index: None,
        })
    }

    /// Replace the tool registry; planner and executor are rebuilt around it
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self.assemble();
        self
    }

    /// Attach the document index that backs the retrieval gate
    pub fn with_document_index(mut self, index: Arc<dyn DocumentIndex>) -> Self {
        self.index = Some(index);
        self.assemble();
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self.assemble();
        self
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn planner(&self) -> &Arc<PlanBuilder> {
        &self.planner
    }

    pub fn executor(&self) -> &Arc<DagExecutor> {
        &self.executor
    }

    /// `None` without a document index or with the gate switched off
    pub fn rag_gate(&self) -> Option<&Arc<RagGate>> {
        self.gate.as_ref()
    }

    /// A gateway sharing this runtime's state
    pub fn gateway(&self, store: Arc<dyn ConversationStore>) -> Gateway {
        let composer = ContextComposer::new(self.settings.intent.history_window, DEFAULT_HISTORY_TOKENS);
        let mut gateway = Gateway::new(self.planner.clone(), self.executor.clone(), store)
            .with_streaming(self.settings.features.streaming)
            .with_composer(composer);
        if let Some(gate) = &self.gate {
            gateway = gateway.with_rag_gate(gate.clone());
        }
        gateway
    }

    fn assemble(&mut self) {
        let generator: Arc<dyn Generator> = self.invoker.clone();
        self.planner = Arc::new(build_planner(
            &self.settings,
            generator.clone(),
            self.tools.clone(),
            &self.clock,
            &self.sessions,
        ));
        self.executor = Arc::new(DagExecutor::new(generator, self.tools.clone()));
        self.gate = match (&self.index, self.settings.features.rag_gate) {
            (Some(index), true) => Some(Arc::new(
                RagGate::new(index.clone(), self.pins.clone(), self.telemetry.clone())
                    .with_config(self.settings.rag_config()),
            )),
            _ => None,
        };
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("providers", &self.keys.providers())
            .field("tools", &self.tools.names())
            .field("rag_gate", &self.gate.is_some())
            .finish()
    }
}

fn build_planner(
    settings: &OrchestratorSettings,
    generator: Arc<dyn Generator>,
    tools: Arc<ToolRegistry>,
    clock: &SharedClock,
    sessions: &Arc<SessionState>,
) -> PlanBuilder {
    let analyzer = IntentAnalyzer::new(generator.clone(), clock.clone())
        .with_gray_classifier(settings.features.gray_classifier)
        .with_cache(IntentCache::new(clock.clone()).with_ttl(settings.intent_cache_ttl()))
        .with_classifier_timeout(settings.role_timeouts().for_role(ModelRole::Classifier));
    PlanBuilder::new(generator, analyzer, tools)
        .with_sessions(sessions.clone())
        .with_refused_intents(settings.intent.refused_intents.iter().cloned())
        .with_history_window(settings.intent.history_window)
}

fn build_provider(settings: &ProviderSettings) -> Result<Arc<dyn Provider>> {
    let mut config = ProviderConfig::new(settings.base_url.as_str());
    if let Some(organization) = &settings.organization {
        config = config.with_organization(organization.as_str());
    }
    let provider: Arc<dyn Provider> = match settings.kind {
        ProviderKind::Openai => Arc::new(OpenAiProvider::new(settings.name.as_str(), config).map_err(provider_error)?),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(settings.name.as_str(), config).map_err(provider_error)?),
    };
    Ok(provider)
}

fn provider_error(e: llm::LlmError) -> OrchestratorError {
    OrchestratorError::Config(e.to_string())
}
